use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

lazy_static! {
    static ref CHANNEL_ID_RE: Regex = Regex::new(r"^UC[a-zA-Z0-9_-]{22}$").expect("valid regex");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelReference {
    Id(String),
    Handle(String),
}

/// Parse an RFC 3339 timestamp as returned by the Data API
pub fn parse_rfc3339(date_str: &str) -> Option<DateTime<Utc>> {
    if date_str.is_empty() {
        return None;
    }
    date_str.parse::<DateTime<Utc>>().ok()
}

pub fn is_channel_id(input: &str) -> bool {
    CHANNEL_ID_RE.is_match(input)
}

// Every channel's uploads playlist shares its id, with the UC prefix swapped for UU.
pub fn uploads_playlist_id(channel_id: &str) -> String {
    match channel_id.strip_prefix("UC") {
        Some(rest) => format!("UU{rest}"),
        None => channel_id.to_string(),
    }
}

/// Accepts a bare channel id or handle, `/channel/<id>` URLs and `/@handle` URLs.
pub fn parse_channel_reference(input: &str) -> Option<ChannelReference> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Some(handle) = input.strip_prefix('@') {
        return non_empty(handle).map(ChannelReference::Handle);
    }

    let parsed_url = match Url::parse(input) {
        Ok(url) => url,
        Err(_) if is_channel_id(input) => return Some(ChannelReference::Id(input.to_string())),
        Err(_) => return Some(ChannelReference::Handle(input.to_string())),
    };

    match parsed_url.host_str()? {
        "www.youtube.com" | "youtube.com" | "m.youtube.com" => {
            let mut segments = parsed_url.path_segments()?;
            match segments.next()? {
                "channel" => segments
                    .next()
                    .and_then(non_empty)
                    .map(ChannelReference::Id),
                first => first
                    .strip_prefix('@')
                    .and_then(non_empty)
                    .map(ChannelReference::Handle),
            }
        }
        _ => None,
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(
        "UCCuzDCoI3EUOo_nhCj4noSw",
        Some(ChannelReference::Id("UCCuzDCoI3EUOo_nhCj4noSw".into()))
    )]
    #[case(
        "https://www.youtube.com/channel/UCkDkZ8PRYXegUJI8lW8f3ig",
        Some(ChannelReference::Id("UCkDkZ8PRYXegUJI8lW8f3ig".into()))
    )]
    #[case(
        "https://youtube.com/@RobertsSpaceInd",
        Some(ChannelReference::Handle("RobertsSpaceInd".into()))
    )]
    #[case("@someone", Some(ChannelReference::Handle("someone".into())))]
    #[case(
        "RobertsSpaceInd",
        Some(ChannelReference::Handle("RobertsSpaceInd".into()))
    )]
    #[case("https://example.com/channel/UCkDkZ8PRYXegUJI8lW8f3ig", None)]
    #[case("   ", None)]
    fn parses_channel_references(#[case] input: &str, #[case] expected: Option<ChannelReference>) {
        assert_eq!(parse_channel_reference(input), expected);
    }

    #[test]
    fn swaps_uploads_prefix() {
        assert_eq!(
            uploads_playlist_id("UCCuzDCoI3EUOo_nhCj4noSw"),
            "UUCuzDCoI3EUOo_nhCj4noSw"
        );
        assert_eq!(uploads_playlist_id("custom"), "custom");
    }

    #[test]
    fn recognises_channel_ids() {
        assert!(is_channel_id("UCCuzDCoI3EUOo_nhCj4noSw"));
        assert!(!is_channel_id("RobertsSpaceInd"));
    }

    #[test]
    fn parses_api_timestamps() {
        let parsed = parse_rfc3339("2024-05-01T12:00:00Z").unwrap();
        assert_eq!(parsed.timestamp(), 1_714_564_800);
        assert!(parse_rfc3339("").is_none());
        assert!(parse_rfc3339("yesterday").is_none());
    }
}
