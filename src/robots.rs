//! Robot catalog, known arm ids, and dataset id helpers.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Supported single-arm robot kits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RobotType {
    So100,
    So101,
    Koch,
}

impl RobotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RobotType::So100 => "so100",
            RobotType::So101 => "so101",
            RobotType::Koch => "koch",
        }
    }

    /// Driver name of the leader (teleoperator) arm.
    pub fn leader_driver(&self) -> String {
        format!("{}_leader", self.as_str())
    }

    /// Driver name of the follower (robot) arm.
    pub fn follower_driver(&self) -> String {
        format!("{}_follower", self.as_str())
    }

    /// Infer the robot type from an arm id such as `so101_follower_lab`.
    pub fn infer_from_id(arm_id: &str) -> Option<RobotType> {
        let lower = arm_id.to_ascii_lowercase();
        if lower.contains("koch") {
            Some(RobotType::Koch)
        } else if lower.contains("so101") {
            Some(RobotType::So101)
        } else if lower.contains("so100") {
            Some(RobotType::So100)
        } else {
            None
        }
    }
}

impl fmt::Display for RobotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RobotType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "so100" => Ok(RobotType::So100),
            "so101" => Ok(RobotType::So101),
            "koch" => Ok(RobotType::Koch),
            other => Err(format!(
                "Unknown robot type '{}'. Available: so100, so101, koch",
                other
            )),
        }
    }
}

/// Arm ids seen for one robot type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArmIds {
    #[serde(default)]
    pub leaders: Vec<String>,
    #[serde(default)]
    pub followers: Vec<String>,
}

/// Registry of arm ids used so far, keyed by robot type name.
///
/// Ids whose robot type cannot be determined are filed under `unknown`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KnownIds(BTreeMap<String, ArmIds>);

impl KnownIds {
    /// Record an arm id. Returns true if the id was new.
    pub fn register(&mut self, robot_type: Option<RobotType>, leader: bool, arm_id: &str) -> bool {
        let arm_id = arm_id.trim();
        if arm_id.is_empty() {
            return false;
        }
        let key = robot_type
            .or_else(|| RobotType::infer_from_id(arm_id))
            .map(|rt| rt.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let entry = self.0.entry(key).or_default();
        let list = if leader {
            &mut entry.leaders
        } else {
            &mut entry.followers
        };
        if list.iter().any(|id| id == arm_id) {
            return false;
        }
        list.push(arm_id.to_string());
        true
    }

    /// Ids for a robot type, followed by ids of unknown type.
    pub fn ids_for(&self, robot_type: RobotType, leader: bool) -> Vec<String> {
        let pick = |ids: &ArmIds| {
            if leader {
                ids.leaders.clone()
            } else {
                ids.followers.clone()
            }
        };
        let mut ids = self.0.get(robot_type.as_str()).map(pick).unwrap_or_default();
        for id in self.0.get("unknown").map(pick).unwrap_or_default() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArmIds)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn ansi_escape() -> Option<&'static Regex> {
    static ANSI: OnceLock<Option<Regex>> = OnceLock::new();
    ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").ok()).as_ref()
}

/// Strip terminal escapes, control characters, backslashes and surrounding
/// slashes from a dataset repo id.
pub fn clean_repo_id(raw: &str) -> String {
    let without_ansi = match ansi_escape() {
        Some(re) => re.replace_all(raw, ""),
        None => raw.into(),
    };
    let cleaned: String = without_ansi
        .chars()
        .filter(|c| *c != '\\' && !c.is_control())
        .collect();
    cleaned.trim().trim_matches('/').to_string()
}

/// Clean and check a dataset repo id of the form `owner/name`.
pub fn validate_repo_id(raw: &str) -> Result<String, String> {
    let cleaned = clean_repo_id(raw);
    match cleaned.split_once('/') {
        Some((owner, name))
            if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok(cleaned)
        }
        _ => Err(format!(
            "'{}' is not a dataset id of the form owner/name (e.g. local/so101_pick)",
            cleaned
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_from_id() {
        assert_eq!(RobotType::infer_from_id("koch_leader"), Some(RobotType::Koch));
        assert_eq!(RobotType::infer_from_id("lab_SO101_f"), Some(RobotType::So101));
        assert_eq!(RobotType::infer_from_id("so100_follower"), Some(RobotType::So100));
        assert_eq!(RobotType::infer_from_id("my_arm"), None);
    }

    #[test]
    fn test_drivers() {
        assert_eq!(RobotType::Koch.leader_driver(), "koch_leader");
        assert_eq!(RobotType::So101.follower_driver(), "so101_follower");
    }

    #[test]
    fn test_robot_type_from_str() {
        assert_eq!("SO101".parse::<RobotType>(), Ok(RobotType::So101));
        assert!("bi_so100".parse::<RobotType>().is_err());
    }

    #[test]
    fn test_register_dedups() {
        let mut ids = KnownIds::default();
        assert!(ids.register(Some(RobotType::So101), true, "left_hand"));
        assert!(!ids.register(Some(RobotType::So101), true, "left_hand"));
        assert!(ids.register(None, false, "mystery"));
        assert_eq!(ids.ids_for(RobotType::So101, true), vec!["left_hand".to_string()]);
        assert_eq!(ids.ids_for(RobotType::So101, false), vec!["mystery".to_string()]);
    }

    #[test]
    fn test_register_ignores_blank() {
        let mut ids = KnownIds::default();
        assert!(!ids.register(None, true, "   "));
        assert!(ids.is_empty());
    }

    #[test]
    fn test_clean_repo_id() {
        assert_eq!(clean_repo_id("\x1b[32m/local/pick\\_cube/\x1b[0m"), "local/pick_cube");
    }

    #[test]
    fn test_validate_repo_id() {
        assert_eq!(validate_repo_id(" user/data "), Ok("user/data".to_string()));
        assert!(validate_repo_id("nodataset").is_err());
        assert!(validate_repo_id("a/b/c").is_err());
        assert!(validate_repo_id("/").is_err());
    }
}
