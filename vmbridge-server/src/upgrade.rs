//! Classification of apt output into the upgrade status taxonomy.
//!
//! Pure text inspection, deterministic for a given input. The remote commands
//! run under `sudo -n`: privileged execution relies on a pre-staged
//! non-interactive sudo policy on the target, so no credential ever appears
//! on a command line.

use serde::Serialize;

/// Checks for upgradable packages without changing the system.
pub const CHECK_COMMAND: &str = "sudo -n apt update && apt list --upgradable";

/// Applies every available upgrade.
pub const APPLY_COMMAND: &str = "sudo -n apt update && sudo -n apt upgrade -y";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeStatus {
    NoUpgrades,
    UpgradesAvailable,
    Success,
    NoUpgradesApplied,
    /// Output matched neither the up-to-date banners nor any upgradable
    /// line; distinct from a confirmed up-to-date system.
    Indeterminate,
}

#[derive(Debug, Serialize)]
pub struct UpgradeReport {
    pub status: UpgradeStatus,
    pub package_manager: &'static str,
    pub details: String,
}

impl UpgradeReport {
    fn new(status: UpgradeStatus, details: String) -> Self {
        Self { status, package_manager: "apt", details }
    }
}

const UP_TO_DATE_MARKERS: [&str; 2] =
    ["All packages are up to date", "0 packages can be upgraded"];

const NOTHING_APPLIED_MARKERS: [&str; 3] = [
    "0 upgraded, 0 newly installed",
    "0 to upgrade, 0 to newly install",
    "0 packages upgraded",
];

/// Interprets the output of [`CHECK_COMMAND`].
pub fn classify_check(raw_output: &str) -> UpgradeReport {
    let upgradable: Vec<&str> = raw_output
        .lines()
        .filter(|line| line.contains("upgradable from") || line.contains("newer is available"))
        .collect();

    if !upgradable.is_empty() {
        return UpgradeReport::new(
            UpgradeStatus::UpgradesAvailable,
            format!(
                "Found the following upgradable packages via apt:\n{}",
                upgradable.join("\n")
            ),
        );
    }

    if UP_TO_DATE_MARKERS.iter().any(|m| raw_output.contains(m)) {
        return UpgradeReport::new(
            UpgradeStatus::NoUpgrades,
            "No upgradable packages found via apt. System is up-to-date.".to_string(),
        );
    }

    UpgradeReport::new(
        UpgradeStatus::Indeterminate,
        "apt ran, but its output matched no known up-to-date or upgradable pattern.".to_string(),
    )
}

/// Interprets the output of [`APPLY_COMMAND`].
pub fn classify_apply(raw_output: &str) -> UpgradeReport {
    if NOTHING_APPLIED_MARKERS.iter().any(|m| raw_output.contains(m)) {
        return UpgradeReport::new(
            UpgradeStatus::NoUpgradesApplied,
            "No new packages were upgraded or installed by apt. System was already up-to-date."
                .to_string(),
        );
    }

    UpgradeReport::new(UpgradeStatus::Success, raw_output.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_reports_upgradable_lines_in_order() {
        let output = "Listing... Done\n\
            bash/jammy-updates 5.1-6ubuntu1.1 amd64 [upgradable from: 5.1-6ubuntu1]\n\
            some noise line\n\
            curl/jammy-updates 7.81.0-1ubuntu1.16 amd64 [upgradable from: 7.81.0-1ubuntu1.15]";
        let report = classify_check(output);
        assert_eq!(report.status, UpgradeStatus::UpgradesAvailable);
        assert_eq!(report.package_manager, "apt");
        let bash_pos = report.details.find("bash/jammy-updates").unwrap();
        let curl_pos = report.details.find("curl/jammy-updates").unwrap();
        assert!(bash_pos < curl_pos);
        assert!(!report.details.contains("noise"));
    }

    #[test]
    fn test_check_up_to_date_banner() {
        let report = classify_check("All packages are up to date.\n0 packages can be upgraded.");
        assert_eq!(report.status, UpgradeStatus::NoUpgrades);
    }

    #[test]
    fn test_check_either_banner_alone_counts() {
        assert_eq!(
            classify_check("Reading state information... Done\nAll packages are up to date.").status,
            UpgradeStatus::NoUpgrades
        );
        assert_eq!(
            classify_check("0 packages can be upgraded. Run 'apt list --upgradable' to see them.")
                .status,
            UpgradeStatus::NoUpgrades
        );
    }

    #[test]
    fn test_check_unrecognized_output_is_indeterminate() {
        let report = classify_check("E: Could not get lock /var/lib/apt/lists/lock");
        assert_eq!(report.status, UpgradeStatus::Indeterminate);
    }

    #[test]
    fn test_apply_nothing_changed() {
        let report =
            classify_apply("Reading package lists...\n0 upgraded, 0 newly installed, 0 to remove and 0 not upgraded.");
        assert_eq!(report.status, UpgradeStatus::NoUpgradesApplied);
    }

    #[test]
    fn test_apply_alternate_phrasings() {
        for output in [
            "0 to upgrade, 0 to newly install, 0 to remove and 0 not to upgrade.",
            "0 packages upgraded, 0 newly installed, 0 removed and 0 not upgraded.",
        ] {
            assert_eq!(classify_apply(output).status, UpgradeStatus::NoUpgradesApplied);
        }
    }

    #[test]
    fn test_apply_success_keeps_raw_output() {
        let output = "Unpacking bash (5.1-6ubuntu1.1) over (5.1-6ubuntu1)...\nSetting up bash...";
        let report = classify_apply(output);
        assert_eq!(report.status, UpgradeStatus::Success);
        assert_eq!(report.details, output);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&UpgradeStatus::NoUpgradesApplied).unwrap(),
            "\"no_upgrades_applied\""
        );
        assert_eq!(
            serde_json::to_string(&UpgradeStatus::Indeterminate).unwrap(),
            "\"indeterminate\""
        );
    }
}
