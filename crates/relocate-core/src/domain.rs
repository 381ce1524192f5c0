use anyhow::{anyhow, Context, Result};
use url::Url;

pub fn clean_domain(input: &str) -> String {
    let mut rest = strip_scheme(input.trim());
    loop {
        rest = rest.trim_start();
        match rest.get(..4) {
            Some(prefix) if prefix.eq_ignore_ascii_case("www.") => rest = &rest[4..],
            _ => break,
        }
    }

    let rest = rest.split('/').next().unwrap_or_default();
    let rest = rest.split(':').next().unwrap_or_default();
    rest.to_lowercase().trim().to_string()
}

fn strip_scheme(input: &str) -> &str {
    let Some((scheme, rest)) = input.split_once("://") else {
        return input;
    };
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|ch| ch.is_ascii_alphabetic())
        && chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.'));
    if valid {
        rest
    } else {
        input
    }
}

pub fn is_local_domain(domain: &str) -> bool {
    let raw = domain.trim();
    if raw == "::1" || raw.contains("[::1]") {
        return true;
    }

    let domain = clean_domain(raw);
    domain.is_empty()
        || domain == "localhost"
        || domain == "0.0.0.0"
        || domain.starts_with("127.")
        || domain.ends_with(".local")
        || domain.ends_with(".localhost")
}

pub fn normalize_physical_uri(path: &str) -> String {
    let segments = path
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();
    if segments.is_empty() {
        return "/".to_string();
    }
    format!("/{}/", segments.join("/"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn is_secure(self) -> bool {
        self == Self::Https
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl {
    pub scheme: Scheme,
    pub domain: String,
    pub physical_uri: String,
}

impl TargetUrl {
    pub fn parse(raw: &str) -> Result<Self> {
        let url = parse_absolute_url(raw)?;
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => return Err(anyhow!("unsupported URL scheme '{other}' in '{raw}'")),
        };
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("URL has no host: {raw}"))?;
        let domain = clean_domain(host);
        if domain.is_empty() {
            return Err(anyhow!("URL host is empty after normalization: {raw}"));
        }

        Ok(Self {
            scheme,
            domain,
            physical_uri: normalize_physical_uri(url.path()),
        })
    }

    pub fn base_url(&self) -> String {
        format!(
            "{}://{}{}",
            self.scheme.as_str(),
            self.domain,
            self.physical_uri
        )
    }
}

pub fn parse_absolute_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("URL must not be empty"));
    }
    let url = Url::parse(trimmed).with_context(|| format!("invalid URL: {trimmed}"))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(anyhow!("URL must be absolute with a host: {trimmed}"));
    }
    Ok(url)
}

// Control characters never occur in URLs, so no `from` can match inside a token.
pub fn replacement_token(index: usize) -> String {
    format!("\u{1}{index}\u{2}")
}

pub fn replace_in_one_pass(text: &str, pairs: &[(String, String)]) -> String {
    let mut out = text.to_string();
    for (index, (from, _)) in pairs.iter().enumerate() {
        if !from.is_empty() {
            out = out.replace(from.as_str(), &replacement_token(index));
        }
    }
    for (index, (_, to)) in pairs.iter().enumerate() {
        out = out.replace(&replacement_token(index), to);
    }
    out
}
