//! Backend scoring
//!
//! A pure function from (profile, capability table, constraints, evidence) to a
//! ranked candidate list. Incompatible backends are filtered out entirely; the
//! remaining ones get a weighted sum over profile fit, historical success,
//! speed, size and packaging compatibility. Ties fall back to
//! [`BackendId::priority`].

use crate::backend::{BackendCapability, BackendId};
use crate::error::{BuildError, BuildResult};
use crate::profile::ProjectProfile;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

const WEIGHT_FIT: f64 = 0.35;
const WEIGHT_HISTORY: f64 = 0.20;
const WEIGHT_SPEED: f64 = 0.15;
const WEIGHT_SIZE: f64 = 0.15;
const WEIGHT_COMPAT: f64 = 0.15;

/// Multiplier applied to the criterion the user prioritises
const PRIORITY_BOOST: f64 = 3.0;

/// Score used when no history exists
const NEUTRAL: f64 = 0.5;

/// What the user cares about most
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Balanced,
    Speed,
    Size,
    Compatibility,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Balanced => write!(f, "balanced"),
            Self::Speed => write!(f, "speed"),
            Self::Size => write!(f, "size"),
            Self::Compatibility => write!(f, "compatibility"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "balanced" | "auto" => Ok(Self::Balanced),
            "speed" => Ok(Self::Speed),
            "size" => Ok(Self::Size),
            "compatibility" | "compat" => Ok(Self::Compatibility),
            other => Err(format!(
                "unknown priority '{}' (expected balanced, speed, size or compatibility)",
                other
            )),
        }
    }
}

/// User constraints on backend selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoringConstraints {
    pub explicit_backend: Option<BackendId>,
    pub excluded_backends: BTreeSet<BackendId>,
    pub priority: Priority,
    /// Drop backends that cannot produce a single-file executable
    pub require_onefile: bool,
    /// Drop backends that cannot embed an icon
    pub require_icon: bool,
}

/// Rough cost of building a profile with one backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub seconds: f64,
    pub bytes: u64,
}

/// Machine-local evidence feeding the score
#[derive(Debug, Clone, Default)]
pub struct ScoringEvidence {
    /// Historical success rate per backend, in [0, 1]
    pub success_rates: BTreeMap<BackendId, f64>,
    /// Adapter cost estimates for the profile being scored
    pub estimates: BTreeMap<BackendId, CostEstimate>,
}

/// One term of a score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    /// Normalised weight
    pub weight: f64,
    /// weight × sub-score
    pub contribution: f64,
}

/// A ranked candidate and the explanation of its score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendScore {
    pub backend: BackendId,
    /// Score in [0, 1]
    pub score: f64,
    pub criteria: Vec<Criterion>,
}

/// Rank the backends able to build `profile`
///
/// Fails with [`BuildError::NoCompatibleBackend`] when nothing survives the
/// hard filter.
pub fn score(
    profile: &ProjectProfile,
    capabilities: &BTreeMap<BackendId, BackendCapability>,
    constraints: &ScoringConstraints,
    evidence: &ScoringEvidence,
) -> BuildResult<Vec<BackendScore>> {
    if let Some(explicit) = constraints.explicit_backend {
        return score_explicit(explicit, profile, capabilities, constraints);
    }

    let mut rejected = Vec::new();
    let mut candidates = Vec::new();
    for id in BackendId::all() {
        if constraints.excluded_backends.contains(&id) {
            rejected.push(format!("{}: excluded", id));
            continue;
        }
        let Some(cap) = capabilities.get(&id) else {
            rejected.push(format!("{}: unknown", id));
            continue;
        };
        match check_compatible(cap, profile, constraints) {
            Ok(()) => candidates.push((id, cap)),
            Err(reason) => rejected.push(format!("{}: {}", id, reason)),
        }
    }

    if candidates.is_empty() {
        return Err(BuildError::NoCompatibleBackend(if rejected.is_empty() {
            "no backends known".to_string()
        } else {
            rejected.join("; ")
        }));
    }

    let weights = Weights::for_priority(constraints.priority);
    let candidate_ids: Vec<BackendId> = candidates.iter().map(|(id, _)| *id).collect();
    let min_secs = min_estimate(&candidate_ids, evidence, |e| e.seconds);
    let min_bytes = min_estimate(&candidate_ids, evidence, |e| e.bytes as f64);

    let mut ranked: Vec<BackendScore> = candidates
        .into_iter()
        .map(|(id, cap)| {
            let speed = match (evidence.estimates.get(&id), min_secs) {
                (Some(est), Some(min)) if est.seconds > 0.0 => min / est.seconds,
                _ => cap.build_time.speed_factor(),
            };
            let size = match (evidence.estimates.get(&id), min_bytes) {
                (Some(est), Some(min)) if est.bytes > 0 => min / est.bytes as f64,
                _ => 1.0 - cap.typical_ratio(),
            };
            let terms = [
                ("profile-fit", weights.fit, profile_fit(id, profile)),
                (
                    "history",
                    weights.history,
                    evidence
                        .success_rates
                        .get(&id)
                        .copied()
                        .unwrap_or(NEUTRAL)
                        .clamp(0.0, 1.0),
                ),
                ("speed", weights.speed, speed.clamp(0.0, 1.0)),
                ("size", weights.size, size.clamp(0.0, 1.0)),
                ("compatibility", weights.compat, compatibility_rating(id)),
            ];
            let criteria: Vec<Criterion> = terms
                .iter()
                .map(|(name, weight, sub)| Criterion {
                    name: name.to_string(),
                    weight: *weight,
                    contribution: weight * sub,
                })
                .collect();
            let score = criteria
                .iter()
                .map(|c| c.contribution)
                .sum::<f64>()
                .clamp(0.0, 1.0);
            BackendScore {
                backend: id,
                score,
                criteria,
            }
        })
        .collect();

    ranked.sort_by(|a, b| match b.score.total_cmp(&a.score) {
        Ordering::Equal => a.backend.priority().cmp(&b.backend.priority()),
        other => other,
    });

    debug!(
        ranking = ?ranked.iter().map(|s| (s.backend, s.score)).collect::<Vec<_>>(),
        rejected = ?rejected,
        "scored backends"
    );
    Ok(ranked)
}

fn score_explicit(
    explicit: BackendId,
    profile: &ProjectProfile,
    capabilities: &BTreeMap<BackendId, BackendCapability>,
    constraints: &ScoringConstraints,
) -> BuildResult<Vec<BackendScore>> {
    if constraints.excluded_backends.contains(&explicit) {
        return Err(BuildError::NoCompatibleBackend(format!(
            "requested backend '{}' is excluded",
            explicit
        )));
    }
    let cap = capabilities.get(&explicit).ok_or_else(|| {
        BuildError::NoCompatibleBackend(format!("requested backend '{}' is unknown", explicit))
    })?;
    check_compatible(cap, profile, constraints).map_err(|reason| {
        BuildError::NoCompatibleBackend(format!(
            "requested backend '{}' is unusable: {}",
            explicit, reason
        ))
    })?;
    Ok(vec![BackendScore {
        backend: explicit,
        score: 1.0,
        criteria: vec![Criterion {
            name: "explicit".to_string(),
            weight: 1.0,
            contribution: 1.0,
        }],
    }])
}

/// Hard filter: installed, right platform, able to express required options
fn check_compatible(
    cap: &BackendCapability,
    profile: &ProjectProfile,
    constraints: &ScoringConstraints,
) -> Result<(), String> {
    if !cap.is_installed() {
        return Err("not installed".to_string());
    }
    if !cap.supports_os(profile.target.os) {
        return Err(format!("cannot target {}", profile.target.os));
    }
    if constraints.require_onefile && !cap.supports_onefile {
        return Err("cannot produce a single-file executable".to_string());
    }
    if constraints.require_icon && !cap.supports_icon {
        return Err("cannot embed an icon".to_string());
    }
    Ok(())
}

/// How well a backend suits the profile's traits, in [0, 1]
fn profile_fit(id: BackendId, profile: &ProjectProfile) -> f64 {
    // (gui, native extensions, data files, small cli, general)
    let table = match id {
        BackendId::Bundler => (1.0, 0.9, 0.9, 0.6, 0.8),
        BackendId::Translator => (0.6, 0.5, 0.7, 1.0, 0.7),
        BackendId::Freezer => (0.7, 0.6, 0.8, 0.5, 0.6),
    };
    let mut traits = Vec::new();
    if profile.has_gui_framework {
        traits.push(table.0);
    }
    if profile.has_native_extensions {
        traits.push(table.1);
    }
    if profile.has_data_files {
        traits.push(table.2);
    }
    if profile.is_small_cli() {
        traits.push(table.3);
    }
    if traits.is_empty() {
        table.4
    } else {
        traits.iter().sum::<f64>() / traits.len() as f64
    }
}

/// How broadly a backend copes with arbitrary third-party packages
fn compatibility_rating(id: BackendId) -> f64 {
    match id {
        BackendId::Bundler => 1.0,
        BackendId::Freezer => 0.8,
        BackendId::Translator => 0.7,
    }
}

fn min_estimate(
    ids: &[BackendId],
    evidence: &ScoringEvidence,
    field: impl Fn(&CostEstimate) -> f64,
) -> Option<f64> {
    let values: Vec<f64> = ids
        .iter()
        .map(|id| evidence.estimates.get(id).map(&field))
        .collect::<Option<Vec<_>>>()?;
    values
        .into_iter()
        .filter(|v| *v > 0.0)
        .min_by(|a, b| a.total_cmp(b))
}

struct Weights {
    fit: f64,
    history: f64,
    speed: f64,
    size: f64,
    compat: f64,
}

impl Weights {
    fn for_priority(priority: Priority) -> Self {
        let (mut speed, mut size, mut compat) = (WEIGHT_SPEED, WEIGHT_SIZE, WEIGHT_COMPAT);
        match priority {
            Priority::Balanced => {}
            Priority::Speed => speed *= PRIORITY_BOOST,
            Priority::Size => size *= PRIORITY_BOOST,
            Priority::Compatibility => compat *= PRIORITY_BOOST,
        }
        let total = WEIGHT_FIT + WEIGHT_HISTORY + speed + size + compat;
        Self {
            fit: WEIGHT_FIT / total,
            history: WEIGHT_HISTORY / total,
            speed: speed / total,
            size: size / total,
            compat: compat / total,
        }
    }
}
