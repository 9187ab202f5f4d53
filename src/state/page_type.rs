/// Page type and stop reason definitions
///
/// This module defines the closed set of page variants the engine can crawl and the
/// reasons a pagination loop may terminate.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the kind of page an entity lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    /// A user profile; paginates over the profile's posts
    Profile,

    /// A hashtag listing; paginates over tagged posts
    Hashtag,

    /// A location page; paginates over posts at the location
    Place,

    /// A single post; paginates over its comments
    Post,

    /// A story reel; emitted as a single batch
    Story,

    /// A search results page; resolves into profile, hashtag or place targets
    Search,
}

impl PageType {
    /// All page types, in declaration order
    pub const ALL: [PageType; 6] = [
        Self::Profile,
        Self::Hashtag,
        Self::Place,
        Self::Post,
        Self::Story,
        Self::Search,
    ];

    /// Converts the page type to a database string representation
    ///
    /// This is also the key used in configuration files.
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Hashtag => "hashtag",
            Self::Place => "place",
            Self::Post => "post",
            Self::Story => "story",
            Self::Search => "search",
        }
    }

    /// Parses a page type from a database string representation
    ///
    /// Returns None if the string doesn't match any known page type.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "profile" => Some(Self::Profile),
            "hashtag" => Some(Self::Hashtag),
            "place" => Some(Self::Place),
            "post" => Some(Self::Post),
            "story" => Some(Self::Story),
            "search" => Some(Self::Search),
            _ => None,
        }
    }

    /// Guesses a page type from the shape of a URL path
    ///
    /// Used as the hint for seeds that don't declare a page type.
    ///
    /// # Examples
    ///
    /// ```
    /// use tidemark::state::PageType;
    ///
    /// assert_eq!(PageType::hint_from_path("/explore/tags/rust/"), Some(PageType::Hashtag));
    /// assert_eq!(PageType::hint_from_path("/someone/"), Some(PageType::Profile));
    /// assert_eq!(PageType::hint_from_path("/"), None);
    /// ```
    pub fn hint_from_path(path: &str) -> Option<Self> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            ["explore", "locations", _, ..] => Some(Self::Place),
            ["explore", "tags", _, ..] => Some(Self::Hashtag),
            ["p", _, ..] | ["reel", _, ..] => Some(Self::Post),
            ["stories", _, ..] => Some(Self::Story),
            ["web", "search", ..] => Some(Self::Search),
            [name] if name.len() >= 2 => Some(Self::Profile),
            _ => None,
        }
    }

    /// Builds the human log prefix for an entity of this type
    pub fn log_label(&self, name: &str) -> String {
        match self {
            Self::Profile => format!("User \"{}\"", name),
            Self::Hashtag => format!("Tag \"{}\"", name),
            Self::Place => format!("Place \"{}\"", name),
            Self::Post => format!("Post \"{}\"", name),
            Self::Story => "Story".to_string(),
            Self::Search => format!("Search \"{}\"", name),
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Which collection of a page a run gathers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultsType {
    /// Posts of profiles, hashtags and places; a post page yields the post itself
    #[default]
    Posts,

    /// Comments of post pages
    Comments,

    /// The page's own details record, without pagination
    Details,

    /// Items of story reels; needs a login
    Stories,
}

/// How a classified page is worked through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    /// Paginate over the page's items
    Paginated,
    /// Take the items embedded in the page state as one batch
    Embedded,
    /// Emit one record describing the page itself
    Details,
}

impl ResultsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Posts => "posts",
            Self::Comments => "comments",
            Self::Details => "details",
            Self::Stories => "stories",
        }
    }

    /// How a page of the given type is collected
    ///
    /// Returns None if pages of that type hold nothing of this kind.
    pub fn collection(&self, page_type: PageType) -> Option<Collection> {
        match (self, page_type) {
            (_, PageType::Search) => None,
            (Self::Posts, PageType::Profile | PageType::Hashtag | PageType::Place) => {
                Some(Collection::Paginated)
            }
            (Self::Posts, PageType::Post) => Some(Collection::Details),
            (Self::Posts, PageType::Story) => Some(Collection::Embedded),
            (Self::Comments, PageType::Post) => Some(Collection::Paginated),
            (Self::Comments, _) => None,
            (Self::Details, _) => Some(Collection::Details),
            (Self::Stories, PageType::Story) => Some(Collection::Embedded),
            (Self::Stories, _) => None,
        }
    }
}

impl fmt::Display for ResultsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a search query looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    User,
    Place,
    Hashtag,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Place => "place",
            Self::Hashtag => "hashtag",
        }
    }

    /// The page type of the targets a search of this type finds
    pub fn page_type(&self) -> PageType {
        match self {
            Self::User => PageType::Profile,
            Self::Place => PageType::Place,
            Self::Hashtag => PageType::Hashtag,
        }
    }
}

/// Why a pagination loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The entity's result limit was reached
    Limit,

    /// The site reported no further pages
    Exhausted,

    /// The last batch fell entirely outside the configured time range
    Boundary,

    /// Too many consecutive duplicate-only batches
    Duplicates,

    /// Rate-limit backoff gave up; the entity stopped early
    RateLimited,

    /// The run was cancelled
    Cancelled,
}

impl StopReason {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Limit => "limit",
            Self::Exhausted => "exhausted",
            Self::Boundary => "boundary",
            Self::Duplicates => "duplicates",
            Self::RateLimited => "rate_limited",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "limit" => Some(Self::Limit),
            "exhausted" => Some(Self::Exhausted),
            "boundary" => Some(Self::Boundary),
            "duplicates" => Some(Self::Duplicates),
            "rate_limited" => Some(Self::RateLimited),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns true if the entity has nothing left to load
    ///
    /// Rate-limited and cancelled stops are not terminal: a later run may pick
    /// the entity up again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Limit | Self::Exhausted | Self::Boundary | Self::Duplicates
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
