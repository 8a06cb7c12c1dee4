//! Run specifications: the declarative intent operators submit.
//!
//! A [`RunSpec`] describes *what* to keep running (command, resources,
//! placement constraints, desired instance count); it never describes how or
//! where. Specs are immutable values keyed by [`RunSpecRef`]: a new version
//! is a new ref, and instances of an older version keep their old ref until
//! they decommission naturally.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A reference to one version of a run specification.
///
/// The `path` is a hierarchical name starting with `/`; the `version` is an
/// opaque token chosen by the submitter. Equality is structural over both
/// fields. Displayed as `{path}#{version}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunSpecRef {
    /// Hierarchical spec path, e.g. `/payments/api`.
    pub path: String,
    /// Opaque version token, e.g. `blue` or a content digest.
    pub version: String,
}

impl RunSpecRef {
    /// Creates a reference without validating the path.
    ///
    /// Use [`RunSpecRef::validated`] at trust boundaries.
    #[must_use]
    pub fn new(path: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
        }
    }

    /// Creates a reference, validating that the path is well-formed.
    ///
    /// # Errors
    ///
    /// Returns a serialization-category error when the path does not start
    /// with `/`, contains empty segments, or the version is empty.
    pub fn validated(
        path: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self, Error> {
        let candidate = Self::new(path, version);
        candidate.validate()?;
        Ok(candidate)
    }

    /// Validates the path and version shape.
    ///
    /// # Errors
    ///
    /// Returns an error naming the malformed component.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.path.starts_with('/') {
            return Err(Error::serialization(format!(
                "run spec path '{}' must start with '/'",
                self.path
            )));
        }
        if self.path.len() == 1 || self.path[1..].split('/').any(|segment| segment.is_empty()) {
            return Err(Error::serialization(format!(
                "run spec path '{}' has empty segments",
                self.path
            )));
        }
        if self
            .path
            .chars()
            .any(|c| c.is_whitespace() || c == '#')
        {
            return Err(Error::serialization(format!(
                "run spec path '{}' contains forbidden characters",
                self.path
            )));
        }
        if self.version.is_empty() {
            return Err(Error::serialization(format!(
                "run spec '{}' has an empty version",
                self.path
            )));
        }
        Ok(())
    }
}

impl fmt::Display for RunSpecRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path, self.version)
    }
}

impl FromStr for RunSpecRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let (path, version) = s
            .split_once('#')
            .ok_or_else(|| Error::serialization(format!("run spec ref '{s}' is missing '#'")))?;
        Self::validated(path, version)
    }
}

/// Resource requirements for one instance, or the resources available in an
/// offer. Units: CPU shares, memory MiB, disk MiB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// CPU shares (fractional cores).
    pub cpus: f64,
    /// Memory in MiB.
    pub mem_mb: f64,
    /// Scratch disk in MiB.
    pub disk_mb: f64,
}

impl ResourceRequirements {
    /// Creates a resource requirement set.
    #[must_use]
    pub const fn new(cpus: f64, mem_mb: f64, disk_mb: f64) -> Self {
        Self {
            cpus,
            mem_mb,
            disk_mb,
        }
    }

    /// Returns true when `other` fits within these (available) resources.
    #[must_use]
    pub fn can_hold(&self, other: &Self) -> bool {
        other.cpus <= self.cpus && other.mem_mb <= self.mem_mb && other.disk_mb <= self.disk_mb
    }

    /// Subtracts consumed resources, saturating at zero.
    #[must_use]
    pub fn minus(&self, consumed: &Self) -> Self {
        Self {
            cpus: (self.cpus - consumed.cpus).max(0.0),
            mem_mb: (self.mem_mb - consumed.mem_mb).max(0.0),
            disk_mb: (self.disk_mb - consumed.disk_mb).max(0.0),
        }
    }
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self::new(0.1, 32.0, 0.0)
    }
}

/// An attribute constraint an offering agent must satisfy.
///
/// Constraints match on agent attributes reported in offers. `Equals` is an
/// exact match; `Exists` only requires the attribute to be present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "op")]
pub enum PlacementConstraint {
    /// The attribute must be present with exactly this value.
    Equals {
        /// Attribute name, e.g. `rack`.
        attribute: String,
        /// Required value.
        value: String,
    },
    /// The attribute must be present with any value.
    Exists {
        /// Attribute name.
        attribute: String,
    },
}

impl PlacementConstraint {
    /// Evaluates the constraint against an agent attribute map.
    #[must_use]
    pub fn is_satisfied_by(&self, attributes: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals { attribute, value } => {
                attributes.get(attribute).is_some_and(|v| v == value)
            }
            Self::Exists { attribute } => attributes.contains_key(attribute),
        }
    }
}

/// A fault-domain preference or placement: a region and optionally a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultDomain {
    /// Region name.
    pub region: String,
    /// Zone within the region, if constrained that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

impl FaultDomain {
    /// Creates a region-level fault domain.
    #[must_use]
    pub fn region(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            zone: None,
        }
    }

    /// Narrows the domain to a zone.
    #[must_use]
    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    /// Returns true when an offer placed in `offered` satisfies this
    /// preference. A zone preference requires both region and zone to match;
    /// a region preference ignores the offered zone.
    #[must_use]
    pub fn accepts(&self, offered: &Self) -> bool {
        if self.region != offered.region {
            return false;
        }
        match &self.zone {
            Some(zone) => offered.zone.as_deref() == Some(zone.as_str()),
            None => true,
        }
    }
}

/// The declarative specification of a long-running service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSpec {
    /// The (path, version) identity of this spec.
    pub reference: RunSpecRef,

    /// Resources each instance requires.
    pub resources: ResourceRequirements,

    /// Shell command each instance executes.
    pub command: String,

    /// Agent attribute constraints; all must hold for a placement.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<PlacementConstraint>,

    /// Preferred fault domain, if placement should be pinned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault_domain: Option<FaultDomain>,

    /// How many instances the operator wants running.
    pub instance_count: u32,
}

impl RunSpec {
    /// Creates a minimal run spec with default resources and one instance.
    #[must_use]
    pub fn new(reference: RunSpecRef, command: impl Into<String>) -> Self {
        Self {
            reference,
            resources: ResourceRequirements::default(),
            command: command.into(),
            constraints: Vec::new(),
            fault_domain: None,
            instance_count: 1,
        }
    }

    /// Sets the per-instance resource requirements.
    #[must_use]
    pub const fn with_resources(mut self, resources: ResourceRequirements) -> Self {
        self.resources = resources;
        self
    }

    /// Adds a placement constraint.
    #[must_use]
    pub fn with_constraint(mut self, constraint: PlacementConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Pins placement to a fault domain.
    #[must_use]
    pub fn with_fault_domain(mut self, domain: FaultDomain) -> Self {
        self.fault_domain = Some(domain);
        self
    }

    /// Sets the desired instance count.
    #[must_use]
    pub const fn with_instance_count(mut self, count: u32) -> Self {
        self.instance_count = count;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_display_joins_path_and_version() {
        let reference = RunSpecRef::new("/svc/api", "v1");
        assert_eq!(reference.to_string(), "/svc/api#v1");
    }

    #[test]
    fn ref_parses_from_display_form() {
        let parsed: RunSpecRef = "/svc/api#v1".parse().expect("parse");
        assert_eq!(parsed, RunSpecRef::new("/svc/api", "v1"));
    }

    #[test]
    fn ref_rejects_relative_paths() {
        assert!(RunSpecRef::validated("svc/api", "v1").is_err());
    }

    #[test]
    fn ref_rejects_empty_segments() {
        assert!(RunSpecRef::validated("/svc//api", "v1").is_err());
        assert!(RunSpecRef::validated("/", "v1").is_err());
    }

    #[test]
    fn ref_rejects_empty_version() {
        assert!(RunSpecRef::validated("/svc", "").is_err());
    }

    #[test]
    fn resources_fit_check() {
        let available = ResourceRequirements::new(1.0, 1024.0, 100.0);
        let small = ResourceRequirements::new(0.5, 256.0, 0.0);
        let big = ResourceRequirements::new(2.0, 256.0, 0.0);

        assert!(available.can_hold(&small));
        assert!(!available.can_hold(&big));
    }

    #[test]
    fn resources_subtract_saturates() {
        let available = ResourceRequirements::new(1.0, 512.0, 0.0);
        let consumed = ResourceRequirements::new(0.75, 768.0, 10.0);
        let rest = available.minus(&consumed);

        assert!((rest.cpus - 0.25).abs() < f64::EPSILON);
        assert!(rest.mem_mb.abs() < f64::EPSILON);
        assert!(rest.disk_mb.abs() < f64::EPSILON);
    }

    #[test]
    fn constraints_match_attributes() {
        let mut attributes = BTreeMap::new();
        attributes.insert("rack".to_string(), "r42".to_string());

        let equals = PlacementConstraint::Equals {
            attribute: "rack".into(),
            value: "r42".into(),
        };
        let wrong = PlacementConstraint::Equals {
            attribute: "rack".into(),
            value: "r7".into(),
        };
        let exists = PlacementConstraint::Exists {
            attribute: "rack".into(),
        };
        let missing = PlacementConstraint::Exists {
            attribute: "gpu".into(),
        };

        assert!(equals.is_satisfied_by(&attributes));
        assert!(!wrong.is_satisfied_by(&attributes));
        assert!(exists.is_satisfied_by(&attributes));
        assert!(!missing.is_satisfied_by(&attributes));
    }

    #[test]
    fn fault_domain_region_preference_ignores_zone() {
        let preference = FaultDomain::region("us-east");
        let offered = FaultDomain::region("us-east").with_zone("us-east-1b");
        assert!(preference.accepts(&offered));
    }

    #[test]
    fn fault_domain_zone_preference_requires_zone_match() {
        let preference = FaultDomain::region("us-east").with_zone("us-east-1a");
        let same_zone = FaultDomain::region("us-east").with_zone("us-east-1a");
        let other_zone = FaultDomain::region("us-east").with_zone("us-east-1b");
        let region_only = FaultDomain::region("us-east");

        assert!(preference.accepts(&same_zone));
        assert!(!preference.accepts(&other_zone));
        assert!(!preference.accepts(&region_only));
    }

    #[test]
    fn run_spec_builder_round_trips_through_json() {
        let spec = RunSpec::new(RunSpecRef::new("/svc/api", "v1"), "./server --port 8080")
            .with_resources(ResourceRequirements::new(0.5, 256.0, 0.0))
            .with_constraint(PlacementConstraint::Exists {
                attribute: "ssd".into(),
            })
            .with_instance_count(3);

        let json = serde_json::to_string(&spec).expect("serialize");
        let back: RunSpec = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, spec);
    }
}
