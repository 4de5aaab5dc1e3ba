use crate::error::{AppError, Result};

/// A normalised HTTPS remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    /// Plain clone URL without credentials.
    pub url: String,
    /// Working-copy directory name.
    pub name: String,
}

fn is_slug_part(part: &str) -> bool {
    !part.is_empty()
        && part != "."
        && part != ".."
        && part
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl RepoRef {
    /// Accept `owner/repo` or an `https://` URL. Anything else, SSH remotes
    /// included, is rejected.
    pub fn parse(reference: &str, host: &str) -> Result<Self> {
        let reference = reference.trim().trim_end_matches('/');

        let url = if reference.starts_with("https://") {
            reference.to_string()
        } else if reference.contains("://") || reference.starts_with("git@") {
            return Err(AppError::Git(format!(
                "Expected HTTPS clone URL, got: {reference}"
            )));
        } else {
            let parts: Vec<&str> = reference.split('/').collect();
            if parts.len() != 2 || !parts.iter().all(|p| is_slug_part(p)) {
                return Err(AppError::Git(format!(
                    "Expected owner/repo or an HTTPS URL, got: {reference}"
                )));
            }
            format!("https://{host}/{reference}")
        };

        let name = url
            .rsplit('/')
            .next()
            .map(|last| last.trim_end_matches(".git"))
            .unwrap_or_default()
            .to_string();
        if !is_slug_part(&name) {
            return Err(AppError::Git(format!(
                "Cannot derive a repository name from: {url}"
            )));
        }

        Ok(Self { url, name })
    }

    /// The URL with the token embedded. Never stored in the working copy.
    pub fn auth_url(&self, token: Option<&str>) -> String {
        match token {
            Some(token) => self
                .url
                .replacen("https://", &format!("https://x-access-token:{token}@"), 1),
            None => self.url.clone(),
        }
    }
}

/// Replace every occurrence of `token` in `text`.
pub fn redact(text: &str, token: Option<&str>) -> String {
    match token {
        Some(token) if !token.is_empty() => text.replace(token, "***"),
        _ => text.to_string(),
    }
}
