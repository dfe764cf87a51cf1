//! Detection aggregation.
//!
//! Maps detector class indices to semantic roles and produces per-frame
//! presence flags. The role table is resolved against the model's class names
//! once per loaded detector.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{info, warn};

use cradle_media::{ClassNames, Detections, MediaResult};
use cradle_models::{ClassRole, PresenceFlags};

/// Class-name patterns that identify each role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleKeywords {
    keywords: BTreeMap<ClassRole, Vec<String>>,
}

impl Default for RoleKeywords {
    fn default() -> Self {
        let keywords = ClassRole::ALL
            .iter()
            .map(|role| {
                let keyword = match role {
                    ClassRole::Subject => "baby",
                    ClassRole::Mouth => "mouth",
                    ClassRole::Nose => "nose",
                    ClassRole::Pacifier => "pacifier",
                };
                (*role, vec![keyword.to_string()])
            })
            .collect();
        Self { keywords }
    }
}

impl RoleKeywords {
    /// Replace the patterns for one role. Patterns are matched lowercased.
    pub fn set(&mut self, role: ClassRole, patterns: Vec<String>) {
        let patterns = patterns.into_iter().map(|p| p.to_lowercase()).collect();
        self.keywords.insert(role, patterns);
    }

    pub fn for_role(&self, role: ClassRole) -> &[String] {
        self.keywords.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    fn matches(&self, role: ClassRole, class_name: &str) -> bool {
        let name = class_name.to_lowercase();
        self.for_role(role)
            .iter()
            .any(|pattern| !pattern.is_empty() && name.contains(pattern.as_str()))
    }
}

/// Role to class index table. Every role always has an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassRoleMap {
    subject: usize,
    mouth: usize,
    nose: usize,
    pacifier: usize,
}

impl Default for ClassRoleMap {
    fn default() -> Self {
        Self {
            subject: ClassRole::Subject.default_index(),
            mouth: ClassRole::Mouth.default_index(),
            nose: ClassRole::Nose.default_index(),
            pacifier: ClassRole::Pacifier.default_index(),
        }
    }
}

impl ClassRoleMap {
    pub fn index(&self, role: ClassRole) -> usize {
        match role {
            ClassRole::Subject => self.subject,
            ClassRole::Mouth => self.mouth,
            ClassRole::Nose => self.nose,
            ClassRole::Pacifier => self.pacifier,
        }
    }

    fn set(&mut self, role: ClassRole, index: usize) {
        match role {
            ClassRole::Subject => self.subject = index,
            ClassRole::Mouth => self.mouth = index,
            ClassRole::Nose => self.nose = index,
            ClassRole::Pacifier => self.pacifier = index,
        }
    }

    /// Resolve roles against a names table.
    ///
    /// For each role the lowest class index whose name contains one of the
    /// role's patterns wins. Unmatched roles keep their current index.
    pub fn resolve(&self, names: &ClassNames, keywords: &RoleKeywords) -> Self {
        let mut resolved = *self;
        for &role in ClassRole::ALL {
            if let Some((&index, _)) = names.iter().find(|(_, name)| keywords.matches(role, name)) {
                resolved.set(role, index);
            }
        }
        resolved
    }

    pub fn presence(&self, detections: &Detections) -> PresenceFlags {
        let detected = detections.class_ids();
        let mut flags = PresenceFlags::default();
        for &role in ClassRole::ALL {
            flags.set(role, detected.contains(&self.index(role)));
        }
        flags
    }
}

impl fmt::Display for ClassRoleMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "subject={} mouth={} nose={} pacifier={}",
            self.subject, self.mouth, self.nose, self.pacifier
        )
    }
}

/// Turns detector output into presence flags.
#[derive(Debug, Clone)]
pub struct DetectionAggregator {
    keywords: RoleKeywords,
    role_map: ClassRoleMap,
    /// Detector generation the role map was last resolved for
    resolved_generation: Option<u64>,
    resolutions: u64,
}

impl DetectionAggregator {
    pub fn new(keywords: RoleKeywords) -> Self {
        Self {
            keywords,
            role_map: ClassRoleMap::default(),
            resolved_generation: None,
            resolutions: 0,
        }
    }

    /// Whether the names table should be fetched for this detector.
    pub fn needs_resolution(&self, generation: u64) -> bool {
        self.resolved_generation != Some(generation)
    }

    /// Resolve the role map for a detector generation.
    ///
    /// A failed names lookup keeps the current table. Either way the
    /// generation counts as resolved, so the lookup is never repeated for the
    /// same detector.
    pub fn apply_resolution(&mut self, generation: u64, names: MediaResult<ClassNames>) {
        if !self.needs_resolution(generation) {
            return;
        }

        match names {
            Ok(names) => {
                self.role_map = self.role_map.resolve(&names, &self.keywords);
                info!(generation, role_map = %self.role_map, "Class roles resolved");
            }
            Err(e) => {
                warn!(
                    generation,
                    error = %e,
                    role_map = %self.role_map,
                    "Class names unavailable, keeping current roles"
                );
            }
        }

        self.resolved_generation = Some(generation);
        self.resolutions += 1;
    }

    pub fn aggregate(&self, detections: &Detections) -> PresenceFlags {
        self.role_map.presence(detections)
    }

    pub fn role_map(&self) -> &ClassRoleMap {
        &self.role_map
    }

    /// Number of resolutions performed so far.
    pub fn resolution_count(&self) -> u64 {
        self.resolutions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cradle_media::MediaError;

    fn names(entries: &[(usize, &str)]) -> ClassNames {
        entries.iter().map(|(i, n)| (*i, n.to_string())).collect()
    }

    #[test]
    fn test_default_map() {
        let map = ClassRoleMap::default();
        assert_eq!(map.index(ClassRole::Subject), 0);
        assert_eq!(map.index(ClassRole::Pacifier), 3);
    }

    #[test]
    fn test_resolve_case_insensitive_substring() {
        let table = names(&[(0, "Pacifier"), (1, "BabyFace"), (2, "nose_tip"), (3, "open-mouth")]);
        let map = ClassRoleMap::default().resolve(&table, &RoleKeywords::default());
        assert_eq!(map.index(ClassRole::Subject), 1);
        assert_eq!(map.index(ClassRole::Mouth), 3);
        assert_eq!(map.index(ClassRole::Nose), 2);
        assert_eq!(map.index(ClassRole::Pacifier), 0);
    }

    #[test]
    fn test_resolve_first_index_wins() {
        let table = names(&[(5, "baby_head"), (2, "baby")]);
        let map = ClassRoleMap::default().resolve(&table, &RoleKeywords::default());
        assert_eq!(map.index(ClassRole::Subject), 2);
    }

    #[test]
    fn test_resolve_unmatched_keeps_prior() {
        let prior = ClassRoleMap::default().resolve(&names(&[(7, "nose")]), &RoleKeywords::default());
        let map = prior.resolve(&names(&[(0, "person")]), &RoleKeywords::default());
        assert_eq!(map.index(ClassRole::Nose), 7);
        assert_eq!(map.index(ClassRole::Subject), 0);
    }

    #[test]
    fn test_custom_keywords() {
        let mut keywords = RoleKeywords::default();
        keywords.set(ClassRole::Subject, vec!["Infant".into(), "baby".into()]);
        let map = ClassRoleMap::default().resolve(&names(&[(0, "mouth"), (4, "infant")]), &keywords);
        assert_eq!(map.index(ClassRole::Subject), 4);
        assert_eq!(keywords.for_role(ClassRole::Subject), ["infant", "baby"]);
    }

    #[test]
    fn test_presence_flags() {
        let map = ClassRoleMap::default();
        let flags = map.presence(&Detections::from_class_ids([0, 3, 9]));
        assert!(flags.subject_seen);
        assert!(!flags.mouth_seen);
        assert!(!flags.nose_seen);
        assert!(flags.pacifier_seen);
        assert!(!flags.risk_condition());

        let flags = map.presence(&Detections::from_class_ids([0]));
        assert!(flags.risk_condition());

        let flags = map.presence(&Detections::default());
        assert_eq!(flags, PresenceFlags::default());
    }

    #[test]
    fn test_resolution_once_per_generation() {
        let mut aggregator = DetectionAggregator::new(RoleKeywords::default());
        assert!(aggregator.needs_resolution(1));

        aggregator.apply_resolution(1, Ok(names(&[(4, "baby")])));
        assert!(!aggregator.needs_resolution(1));
        for _ in 0..100 {
            aggregator.apply_resolution(1, Ok(names(&[(9, "baby")])));
        }
        assert_eq!(aggregator.resolution_count(), 1);
        assert_eq!(aggregator.role_map().index(ClassRole::Subject), 4);

        assert!(aggregator.needs_resolution(2));
        aggregator.apply_resolution(2, Ok(names(&[(6, "baby")])));
        assert_eq!(aggregator.resolution_count(), 2);
        assert_eq!(aggregator.role_map().index(ClassRole::Subject), 6);
    }

    #[test]
    fn test_failed_lookup_fails_open() {
        let mut aggregator = DetectionAggregator::new(RoleKeywords::default());
        aggregator.apply_resolution(1, Err(MediaError::inference("no metadata")));
        assert!(!aggregator.needs_resolution(1));
        assert_eq!(*aggregator.role_map(), ClassRoleMap::default());

        let flags = aggregator.aggregate(&Detections::from_class_ids([0, 2]));
        assert!(flags.subject_seen);
        assert!(flags.nose_seen);
    }

    #[test]
    fn test_model_without_names_uses_default_roles() {
        let mut aggregator = DetectionAggregator::new(RoleKeywords::default());
        aggregator.apply_resolution(
            3,
            Err(MediaError::MissingClassNames("/models/night.onnx".into())),
        );
        assert!(!aggregator.needs_resolution(3));
        assert_eq!(*aggregator.role_map(), ClassRoleMap::default());

        let flags = aggregator.aggregate(&Detections::from_class_ids([1, 3]));
        assert!(!flags.subject_seen);
        assert!(flags.mouth_seen);
        assert!(flags.pacifier_seen);
    }
}
