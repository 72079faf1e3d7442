use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use url::Url;

pub fn catalog_search_url(base: &str, title: &str, artist: &str) -> String {
    let q = format!("{} {}", title, artist);
    let encoded = utf8_percent_encode(&q, NON_ALPHANUMERIC).to_string();
    format!("{}/cloudsearch?keywords={encoded}&limit=1", base.trim_end_matches('/'))
}

pub fn catalog_lyric_url(base: &str, id: &str) -> String {
    let encoded = utf8_percent_encode(id, NON_ALPHANUMERIC).to_string();
    format!("{}/lyric?id={encoded}", base.trim_end_matches('/'))
}

/// Joins an endpoint path onto the relay base URL, keeping any base path prefix.
pub fn relay_endpoint(base: &str, path: &str) -> Result<Url, url::ParseError> {
    let mut base = Url::parse(base)?;
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path.trim_start_matches('/'))
}
