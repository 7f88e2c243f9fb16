use std::str::FromStr;
use serde::Deserialize;

/// Which redeploy backoff counter a supervised process uses.
///
/// - `Global`: one counter shared by every deployment. An exit of one
///   process lengthens the next redeploy delay of every other (default).
/// - `PerPath`: one counter per watched path, so unrelated deployments back
///   off independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffScope {
    Global,
    PerPath,
}

impl Default for BackoffScope {
    fn default() -> Self {
        BackoffScope::Global
    }
}

impl FromStr for BackoffScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "global" => Ok(BackoffScope::Global),
            "per_path" => Ok(BackoffScope::PerPath),
            other => Err(format!(
                "invalid backoff_scope: {other} (expected \"global\" or \"per_path\")"
            )),
        }
    }
}
