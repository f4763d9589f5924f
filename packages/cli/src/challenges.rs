// ABOUTME: Loading challenge descriptors from JSON files for import into the catalog
// ABOUTME: Accepts a single descriptor object or an array and validates each entry

use arena_instance::challenge::MAX_DURATION_SECS;
use arena_instance::ChallengeDescriptor;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChallengeFileError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed challenge JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid challenge '{id}': {reason}")]
    Invalid { id: String, reason: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<ChallengeDescriptor>),
    One(Box<ChallengeDescriptor>),
}

pub fn parse_challenges(text: &str) -> Result<Vec<ChallengeDescriptor>, ChallengeFileError> {
    let challenges = match serde_json::from_str::<OneOrMany>(text) {
        Ok(OneOrMany::Many(list)) => list,
        Ok(OneOrMany::One(one)) => vec![*one],
        // Re-parse as a single object for a useful error message
        Err(_) => vec![serde_json::from_str::<ChallengeDescriptor>(text)?],
    };

    for challenge in &challenges {
        validate(challenge)?;
    }
    Ok(challenges)
}

pub fn load_challenges(path: &Path) -> Result<Vec<ChallengeDescriptor>, ChallengeFileError> {
    let text = std::fs::read_to_string(path).map_err(|source| ChallengeFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_challenges(&text)
}

fn validate(challenge: &ChallengeDescriptor) -> Result<(), ChallengeFileError> {
    let invalid = |reason: &str| ChallengeFileError::Invalid {
        id: challenge.id.clone(),
        reason: reason.to_string(),
    };

    if challenge.id.trim().is_empty() {
        return Err(invalid("id is empty"));
    }
    if challenge.image.trim().is_empty() {
        return Err(invalid("image is empty"));
    }
    if challenge.duration_secs == 0 {
        return Err(invalid("duration_secs must be positive"));
    }
    if challenge.duration_secs > MAX_DURATION_SECS {
        return Err(invalid(&format!(
            "duration_secs may not exceed {}",
            MAX_DURATION_SECS
        )));
    }
    if challenge.cpu_cores < 0.0 {
        return Err(invalid("cpu_cores cannot be negative"));
    }
    if challenge.exposed_ports.iter().any(|p| p.port == 0) {
        return Err(invalid("exposed port 0 is not allowed"));
    }
    Ok(())
}
