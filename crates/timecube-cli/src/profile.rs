//! Provisioning profiles.
//!
//! A profile is a TOML file holding everything one cube needs:
//!
//! ```toml
//! [wifi]
//! ssid = "office"
//! password = "hunter22"
//!
//! [provider]
//! token = "1a2b3c4d5e6f"
//! workspace_id = "4242"
//!
//! [projects]
//! face_down = 101
//! left_side = 102
//! ```
//!
//! Face-up is the break position and cannot be assigned.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use timecube_types::{
    CharacteristicRole, ConfigurationRecord, ProjectAssignments, ProviderCredentials,
    WifiCredentials,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub wifi: WifiSection,
    pub provider: ProviderSection,
    #[serde(default)]
    pub projects: ProjectsSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WifiSection {
    pub ssid: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSection {
    pub token: String,
    pub workspace_id: String,
}

/// Project ID per orientation; `0` or absent means unassigned.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectsSection {
    pub face_down: i32,
    pub left_side: i32,
    pub right_side: i32,
    pub front_edge: i32,
    pub back_edge: i32,
}

impl Profile {
    /// Read and parse a profile file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid profile: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse profile")
    }

    /// Check every field and build the record to send.
    ///
    /// All problems are reported together.
    pub fn to_record(&self) -> Result<ConfigurationRecord> {
        let mut problems = Vec::new();

        let text_fields = [
            (CharacteristicRole::WifiSsid, &self.wifi.ssid),
            (CharacteristicRole::WifiPassword, &self.wifi.password),
            (CharacteristicRole::ProviderToken, &self.provider.token),
            (CharacteristicRole::WorkspaceId, &self.provider.workspace_id),
        ];
        for (role, value) in text_fields {
            if value.trim().is_empty() {
                problems.push(format!("{} is required", role));
            } else if value.len() >= role.max_len() {
                problems.push(format!(
                    "{} is {} bytes, it must be shorter than {}",
                    role,
                    value.len(),
                    role.max_len()
                ));
            }
        }

        let workspace_id = self.provider.workspace_id.trim();
        if !workspace_id.is_empty() && !workspace_id.chars().all(|c| c.is_ascii_digit()) {
            problems.push("workspace id must be numeric".to_string());
        }

        let assignments = ProjectAssignments {
            face_down: self.projects.face_down,
            left_side: self.projects.left_side,
            right_side: self.projects.right_side,
            front_edge: self.projects.front_edge,
            back_edge: self.projects.back_edge,
        };
        if assignments.to_slots().iter().any(|id| *id < 0) {
            problems.push("project ids cannot be negative".to_string());
        }
        if !assignments.has_any() {
            problems.push("assign a project to at least one orientation".to_string());
        }

        if !problems.is_empty() {
            bail!("{}", problems.join("; "));
        }

        Ok(ConfigurationRecord::new(
            WifiCredentials {
                ssid: self.wifi.ssid.clone(),
                password: self.wifi.password.clone(),
            },
            ProviderCredentials {
                token: self.provider.token.clone(),
                workspace_id: workspace_id.to_string(),
            },
            assignments,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
        [wifi]
        ssid = "home"
        password = "secret"

        [provider]
        token = "tok123456789012"
        workspace_id = "42"

        [projects]
        face_down = 10
        back_edge = 50
    "#;

    #[test]
    fn test_valid_profile() {
        let record = Profile::parse(VALID).unwrap().to_record().unwrap();
        assert_eq!(record.wifi.ssid, "home");
        assert_eq!(record.provider.workspace_id, "42");
        assert_eq!(record.project_slots(), [0, 10, 0, 0, 0, 50]);
    }

    #[test]
    fn test_reports_every_problem() {
        let profile = Profile::parse(
            r#"
            [wifi]
            ssid = "  "
            password = "secret"

            [provider]
            token = "tok"
            workspace_id = "ws-42"
            "#,
        )
        .unwrap();

        let err = profile.to_record().unwrap_err().to_string();
        assert!(err.contains("SSID"), "{err}");
        assert!(err.contains("numeric"), "{err}");
        assert!(err.contains("at least one orientation"), "{err}");
    }

    #[test]
    fn test_rejects_oversized_field() {
        let mut profile = Profile::parse(VALID).unwrap();
        profile.provider.token = "x".repeat(CharacteristicRole::ProviderToken.max_len());
        let err = profile.to_record().unwrap_err().to_string();
        assert!(err.contains("shorter than 128"), "{err}");
    }

    #[test]
    fn test_rejects_unknown_orientation() {
        let content = VALID.replace("back_edge = 50", "face_up = 5");
        assert!(Profile::parse(&content).is_err());
    }

    #[test]
    fn test_rejects_negative_project() {
        let content = VALID.replace("back_edge = 50", "back_edge = -1");
        let err = Profile::parse(&content).unwrap().to_record().unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("office.toml");
        fs::write(&path, VALID).unwrap();
        assert!(Profile::load(&path).is_ok());
        assert!(Profile::load(&dir.path().join("missing.toml")).is_err());
    }
}
