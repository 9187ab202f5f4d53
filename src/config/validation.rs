use crate::config::types::{
    AdapterEntry, Config, CrawlerConfig, CredentialsConfig, OutputConfig, ScrollConfig,
    SearchConfig, SeedEntry,
};
use crate::state::{PageType, ResultsType, TimeRange};
use crate::url::page_type_hint;
use crate::ConfigError;
use chrono::Utc;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_scroll_config(&config.scroll)?;
    validate_credentials_config(&config.credentials, config.crawler.require_credentials)?;
    validate_output_config(&config.output)?;
    validate_seeds(&config.seeds)?;
    if let Some(search) = &config.search {
        validate_search(search)?;
    }
    validate_adapters(&config.adapters)?;
    validate_story_login(config)?;

    TimeRange::parse(
        config.time_range.min.as_deref(),
        config.time_range.max.as_deref(),
        Utc::now(),
    )?;

    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrency < 1 || config.max_concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "max-concurrency must be between 1 and 100, got {}",
            config.max_concurrency
        )));
    }

    if config.max_request_retries < 1 {
        return Err(ConfigError::Validation(
            "max-request-retries must be >= 1".to_string(),
        ));
    }

    if config.item_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "item-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.results_limit == Some(0) {
        return Err(ConfigError::Validation(
            "results-limit must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_scroll_config(config: &ScrollConfig) -> Result<(), ConfigError> {
    if config.stall_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "stall-attempts must be >= 1, got {}",
            config.stall_attempts
        )));
    }

    if config.advance_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "advance-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.max_duplicate_batches == Some(0) {
        return Err(ConfigError::Validation(
            "max-duplicate-batches must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_credentials_config(
    config: &CredentialsConfig,
    required: bool,
) -> Result<(), ConfigError> {
    if config.max_error_count < 1 {
        return Err(ConfigError::Validation(format!(
            "max-error-count must be >= 1, got {}",
            config.max_error_count
        )));
    }

    match &config.file {
        Some(path) if path.is_empty() => Err(ConfigError::Validation(
            "credentials file path cannot be empty".to_string(),
        )),
        None if required => Err(ConfigError::InvalidCredentials(
            "require-credentials is set but no credentials file is configured".to_string(),
        )),
        _ => Ok(()),
    }
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.results_path.is_empty() {
        return Err(ConfigError::Validation(
            "results-path cannot be empty".to_string(),
        ));
    }

    if let Some(fields) = &config.pick_fields {
        if fields.iter().any(|f| f.is_empty()) {
            return Err(ConfigError::Validation(
                "pick-fields cannot contain empty names".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_seeds(seeds: &[SeedEntry]) -> Result<(), ConfigError> {
    for seed in seeds {
        let url = Url::parse(&seed.url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed '{}': {}", seed.url, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Seed must use http or https: {}",
                seed.url
            )));
        }

        if url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl(format!(
                "Seed has no host: {}",
                seed.url
            )));
        }

        if seed.page_type == Some(PageType::Search) {
            return Err(ConfigError::Validation(format!(
                "Seed {} cannot be a search page; use the [search] section",
                seed.url
            )));
        }
    }

    Ok(())
}

fn validate_search(search: &SearchConfig) -> Result<(), ConfigError> {
    if search.query.trim().is_empty() {
        return Err(ConfigError::Validation(
            "search query cannot be empty".to_string(),
        ));
    }

    if search.limit < 1 {
        return Err(ConfigError::Validation(
            "search limit must be >= 1".to_string(),
        ));
    }

    if !search.url_template.contains("{query}") {
        return Err(ConfigError::Validation(format!(
            "search url-template must contain {{query}}, got '{}'",
            search.url_template
        )));
    }

    let filled = search
        .url_template
        .replace("{query}", "q")
        .replace("{type}", search.search_type.as_str());
    Url::parse(&filled).map_err(|e| {
        ConfigError::InvalidUrl(format!(
            "Invalid search url-template '{}': {}",
            search.url_template, e
        ))
    })?;

    validate_pointer(&search.results_pointer)?;

    if !search.result_url_template.contains("{/") {
        return Err(ConfigError::Validation(format!(
            "search result-url-template must contain a {{/pointer}} placeholder, got '{}'",
            search.result_url_template
        )));
    }

    Ok(())
}

/// Stories are only served to logged-in sessions
fn validate_story_login(config: &Config) -> Result<(), ConfigError> {
    if config.credentials.file.is_some() {
        return Ok(());
    }

    if config.crawler.results_type == ResultsType::Stories {
        return Err(ConfigError::InvalidCredentials(
            "results-type \"stories\" requires a credentials file".to_string(),
        ));
    }

    let story_seed = config.seeds.iter().find(|seed| {
        seed.page_type.or_else(|| page_type_hint(&seed.url)) == Some(PageType::Story)
    });
    match story_seed {
        Some(seed) => Err(ConfigError::InvalidCredentials(format!(
            "story seed {} requires a credentials file",
            seed.url
        ))),
        None => Ok(()),
    }
}

fn validate_adapters(adapters: &[AdapterEntry]) -> Result<(), ConfigError> {
    let mut page_types = HashSet::new();

    for adapter in adapters {
        if !page_types.insert(adapter.page_type) {
            return Err(ConfigError::Validation(format!(
                "Duplicate adapter for page type {}",
                adapter.page_type
            )));
        }

        let pointers = [
            Some(&adapter.detect_pointer),
            Some(&adapter.entity_pointer),
            Some(&adapter.items_pointer),
            adapter.label_pointer.as_ref(),
            adapter.has_next_pointer.as_ref(),
            adapter.details_pointer.as_ref(),
        ];
        for pointer in pointers.into_iter().flatten() {
            validate_pointer(pointer)?;
        }

        if adapter.id_field.is_empty() {
            return Err(ConfigError::Validation(format!(
                "id-field cannot be empty for {} adapter",
                adapter.page_type
            )));
        }

        if let Some(template) = &adapter.detail_url_template {
            if !template.contains("{id}") {
                return Err(ConfigError::Validation(format!(
                    "detail-url-template must contain {{id}}, got '{}'",
                    template
                )));
            }
        }
    }

    Ok(())
}

fn validate_pointer(pointer: &str) -> Result<(), ConfigError> {
    if !pointer.starts_with('/') {
        return Err(ConfigError::Validation(format!(
            "JSON pointer must start with '/', got '{}'",
            pointer
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    const BASE: &str = r#"
[crawler]
max-concurrency = 2

[output]
database-path = "a.db"
results-path = "a.jsonl"
"#;

    fn with(extra: &str) -> Result<Config, ConfigError> {
        parse_config(&format!("{}\n{}", BASE, extra))
    }

    #[test]
    fn test_base_is_valid() {
        assert!(with("").is_ok());
    }

    #[test]
    fn test_concurrency_bounds() {
        let result = parse_config(&BASE.replace("max-concurrency = 2", "max-concurrency = 0"));
        assert!(matches!(result, Err(ConfigError::Validation(_))));

        let result = parse_config(&BASE.replace("max-concurrency = 2", "max-concurrency = 101"));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_stall_attempts_zero() {
        let result = with("[scroll]\nstall-attempts = 0");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_required_credentials_need_file() {
        let result = parse_config(&BASE.replace(
            "max-concurrency = 2",
            "max-concurrency = 2\nrequire-credentials = true",
        ));
        assert!(matches!(result, Err(ConfigError::InvalidCredentials(_))));
    }

    #[test]
    fn test_seed_scheme() {
        let result = with("[[seed]]\nurl = \"ftp://site.example/nasa/\"");
        assert!(matches!(result, Err(ConfigError::InvalidUrl(_))));

        let result = with("[[seed]]\nurl = \"not a url\"");
        assert!(matches!(result, Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_seed_cannot_be_search() {
        let result = with(
            "[[seed]]\nurl = \"https://site.example/web/search/\"\npage-type = \"search\"",
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_bad_time_range() {
        let result = with("[time-range]\nmin = \"last tuesday\"");
        assert!(matches!(result, Err(ConfigError::InvalidTimeRange(_))));
    }

    #[test]
    fn test_adapter_pointer_and_duplicates() {
        let adapter = r#"
[[adapter]]
page-type = "profile"
detect-pointer = "user"
entity-pointer = "/user/id"
items-pointer = "/user/media"
"#;
        assert!(matches!(with(adapter), Err(ConfigError::Validation(_))));

        let good = adapter.replace("\"user\"", "\"/user\"");
        assert!(with(&good).is_ok());
        assert!(matches!(
            with(&format!("{}\n{}", good, good)),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_detail_template_placeholder() {
        let adapter = r#"
[[adapter]]
page-type = "hashtag"
detect-pointer = "/tag"
entity-pointer = "/tag/name"
items-pointer = "/tag/media"
detail-url-template = "https://site.example/p/"
"#;
        assert!(matches!(with(adapter), Err(ConfigError::Validation(_))));
    }

    const SEARCH: &str = r#"
[search]
query = "harbor"
search-type = "place"
url-template = "https://site.example/web/search/?context={type}&query={query}"
results-pointer = "/places"
result-url-template = "https://site.example/explore/locations/{/place/pk}/"
"#;

    #[test]
    fn test_search_section() {
        assert!(with(SEARCH).is_ok());

        let no_query = SEARCH.replace("query = \"harbor\"", "query = \" \"");
        assert!(matches!(with(&no_query), Err(ConfigError::Validation(_))));

        let no_placeholder = SEARCH.replace("&query={query}", "");
        assert!(matches!(with(&no_placeholder), Err(ConfigError::Validation(_))));

        let zero_limit = format!("{}limit = 0\n", SEARCH);
        assert!(matches!(with(&zero_limit), Err(ConfigError::Validation(_))));

        let fixed_target = SEARCH.replace("{/place/pk}/", "");
        assert!(matches!(with(&fixed_target), Err(ConfigError::Validation(_))));

        let bad_type = SEARCH.replace("\"place\"", "\"video\"");
        assert!(matches!(with(&bad_type), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_stories_require_login() {
        let stories = BASE.replace(
            "max-concurrency = 2",
            "max-concurrency = 2\nresults-type = \"stories\"",
        );
        assert!(matches!(
            parse_config(&stories),
            Err(ConfigError::InvalidCredentials(_))
        ));

        let story_seed = with("[[seed]]\nurl = \"https://site.example/stories/nasa/\"");
        assert!(matches!(story_seed, Err(ConfigError::InvalidCredentials(_))));

        let declared = with(
            "[[seed]]\nurl = \"https://site.example/nasa/\"\npage-type = \"story\"",
        );
        assert!(matches!(declared, Err(ConfigError::InvalidCredentials(_))));

        let logged_in = format!(
            "{}\n[credentials]\nfile = \"logins.json\"",
            stories
        );
        assert!(parse_config(&logged_in).is_ok());
    }
}
