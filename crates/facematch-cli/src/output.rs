use facematch_core::{BestMatch, IdentityRecord, Outcome, ThresholdMatch};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Listing entry; descriptors are not printed.
#[derive(Debug, Serialize)]
pub struct IdentitySummary {
    pub name: String,
    pub handle: String,
    pub profile_link: String,
    pub enrolled_at: String,
    pub dimension: usize,
    pub model_version: Option<String>,
}

impl From<IdentityRecord> for IdentitySummary {
    fn from(record: IdentityRecord) -> Self {
        Self {
            dimension: record.descriptor.dimension(),
            model_version: record.descriptor.model_version,
            name: record.name,
            handle: record.metadata.handle,
            profile_link: record.metadata.profile_link,
            enrolled_at: record.metadata.enrolled_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub version: &'static str,
    pub scrfd_model: PathBuf,
    pub arcface_model: PathBuf,
    pub db_path: PathBuf,
    pub enrolled: usize,
}

/// Result of one CLI command, printable as text or JSON.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Report {
    Enrolled { name: String },
    Matches { matches: Vec<ThresholdMatch> },
    Best {
        #[serde(flatten)]
        best: BestMatch,
        similarity_percent: String,
    },
    Deleted { name: String },
    Identities { identities: Vec<IdentitySummary> },
    Identity { identity: IdentitySummary },
    Status(StatusReport),
    NoFaceFound,
    NotFound,
}

impl Report {
    /// Lift a service outcome into a report, keeping the negatives.
    pub fn from_outcome<T>(outcome: Outcome<T>, f: impl FnOnce(T) -> Report) -> Report {
        match outcome {
            Outcome::Success(value) => f(value),
            Outcome::NoFaceFound => Report::NoFaceFound,
            Outcome::NotFound => Report::NotFound,
        }
    }

    pub fn best(best: BestMatch) -> Report {
        Report::Best {
            similarity_percent: best.similarity_percent(),
            best,
        }
    }

    /// Whether the command found what it was asked for.
    pub fn is_positive(&self) -> bool {
        !matches!(self, Report::NoFaceFound | Report::NotFound)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::Enrolled { name } => write!(f, "Enrolled {name}"),
            Report::Matches { matches } => {
                for (i, m) in matches.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}\t{}", m.name, m.metadata.profile_link)?;
                }
                Ok(())
            }
            Report::Best { best, similarity_percent } => write!(
                f,
                "{}\t{}\t{}",
                best.name, similarity_percent, best.metadata.profile_link
            ),
            Report::Deleted { name } => write!(f, "Deleted {name}"),
            Report::Identities { identities } => {
                if identities.is_empty() {
                    return write!(f, "No identities enrolled");
                }
                for (i, id) in identities.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}\t{}\t{}", id.name, id.profile_link, id.enrolled_at)?;
                }
                Ok(())
            }
            Report::Identity { identity } => {
                writeln!(f, "name:          {}", identity.name)?;
                writeln!(f, "handle:        {}", identity.handle)?;
                writeln!(f, "profile:       {}", identity.profile_link)?;
                writeln!(f, "enrolled:      {}", identity.enrolled_at)?;
                writeln!(f, "dimension:     {}", identity.dimension)?;
                write!(
                    f,
                    "model version: {}",
                    identity.model_version.as_deref().unwrap_or("unknown")
                )
            }
            Report::Status(s) => {
                writeln!(f, "facematch {}", s.version)?;
                writeln!(f, "detector:  {}", s.scrfd_model.display())?;
                writeln!(f, "embedder:  {}", s.arcface_model.display())?;
                writeln!(f, "database:  {}", s.db_path.display())?;
                write!(f, "enrolled:  {}", s.enrolled)
            }
            Report::NoFaceFound => write!(f, "No face found in image"),
            Report::NotFound => write!(f, "No matching identity found"),
        }
    }
}
