//! Annotation keys and the namespace debt status enum.
//!
//! The billing collaborator writes the trigger value of `debt-status` on the
//! tenant namespace; every other annotation here is owned by this controller.

/// Namespace annotation carrying the billing-driven debt state
pub const DEBT_STATUS_ANNOTATION: &str = "debt-status";

/// Marker written on every resource a strategy suspends ("true")
pub const SUSPENDED_ANNOTATION: &str = "debt-suspended";

/// RFC3339 timestamp of when the resource was suspended
pub const SUSPENDED_TIME_ANNOTATION: &str = "debt-suspended-time";

/// Backup annotation keys per resource kind (inline JSON payload)
pub const ORIGINAL_HOSTS_ANNOTATION: &str = "debt-original-hosts";
/// Service ports backup
pub const ORIGINAL_PORTS_ANNOTATION: &str = "debt-original-ports";
/// Gateway servers backup
pub const ORIGINAL_SERVERS_ANNOTATION: &str = "debt-original-servers";
/// VirtualService http routes backup
pub const ORIGINAL_HTTP_ANNOTATION: &str = "debt-original-http";
/// RoleBinding roleRef + subjects backup
pub const ORIGINAL_ROLE_REF_ANNOTATION: &str = "debt-original-role-ref";
/// Scheduler an orphan pod ran under before suspension
pub const ORIGINAL_SCHEDULER_ANNOTATION: &str = "debt-original-scheduler";

/// Suffix appended to a backup key when the payload lives in a ConfigMap
pub const BACKUP_CONFIGMAP_SUFFIX: &str = "-configmap";

/// Labels stamped on companion backup ConfigMaps
pub const BACKUP_SOURCE_KIND_LABEL: &str = "debt.tenantcloud.dev/backup-source-kind";
/// Name of the resource a backup ConfigMap belongs to
pub const BACKUP_SOURCE_NAME_LABEL: &str = "debt.tenantcloud.dev/backup-source-name";

/// Debt state of a tenant namespace, as carried in the `debt-status` annotation.
///
/// Completed values are terminal for a reconciliation pass; the controller
/// takes no further action until the billing collaborator writes a new
/// non-completed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebtStatus {
    /// Account in good standing, nothing to do
    Normal,
    /// Suspend all tenant resources
    Suspend,
    /// Suspension finished
    SuspendCompleted,
    /// Suspend ahead of debt-driven termination
    TerminateSuspend,
    /// Terminal suspension finished
    TerminateSuspendCompleted,
    /// Restore all tenant resources
    Resume,
    /// Restoration finished
    ResumeCompleted,
    /// Permanently delete all tenant resources
    FinalDeletion,
    /// Deletion finished
    FinalDeletionCompleted,
}

impl DebtStatus {
    /// Parse an annotation value; unknown values return `None` so the caller
    /// can self-heal by coercing back to `Normal`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Normal" => Some(DebtStatus::Normal),
            "Suspend" => Some(DebtStatus::Suspend),
            "SuspendCompleted" => Some(DebtStatus::SuspendCompleted),
            "TerminateSuspend" => Some(DebtStatus::TerminateSuspend),
            "TerminateSuspendCompleted" => Some(DebtStatus::TerminateSuspendCompleted),
            "Resume" => Some(DebtStatus::Resume),
            "ResumeCompleted" => Some(DebtStatus::ResumeCompleted),
            "FinalDeletion" => Some(DebtStatus::FinalDeletion),
            "FinalDeletionCompleted" => Some(DebtStatus::FinalDeletionCompleted),
            _ => None,
        }
    }

    /// Annotation wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            DebtStatus::Normal => "Normal",
            DebtStatus::Suspend => "Suspend",
            DebtStatus::SuspendCompleted => "SuspendCompleted",
            DebtStatus::TerminateSuspend => "TerminateSuspend",
            DebtStatus::TerminateSuspendCompleted => "TerminateSuspendCompleted",
            DebtStatus::Resume => "Resume",
            DebtStatus::ResumeCompleted => "ResumeCompleted",
            DebtStatus::FinalDeletion => "FinalDeletion",
            DebtStatus::FinalDeletionCompleted => "FinalDeletionCompleted",
        }
    }

    /// Completed values end the current reconciliation pass
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DebtStatus::SuspendCompleted
                | DebtStatus::TerminateSuspendCompleted
                | DebtStatus::ResumeCompleted
                | DebtStatus::FinalDeletionCompleted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for value in [
            "Normal",
            "Suspend",
            "SuspendCompleted",
            "TerminateSuspend",
            "TerminateSuspendCompleted",
            "Resume",
            "ResumeCompleted",
            "FinalDeletion",
            "FinalDeletionCompleted",
        ] {
            let status = DebtStatus::parse(value).unwrap();
            assert_eq!(status.as_str(), value);
        }
    }

    #[test]
    fn test_parse_unknown_value() {
        assert_eq!(DebtStatus::parse("Garbage"), None);
        assert_eq!(DebtStatus::parse(""), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(DebtStatus::SuspendCompleted.is_terminal());
        assert!(DebtStatus::TerminateSuspendCompleted.is_terminal());
        assert!(DebtStatus::ResumeCompleted.is_terminal());
        assert!(DebtStatus::FinalDeletionCompleted.is_terminal());
        assert!(!DebtStatus::Suspend.is_terminal());
        assert!(!DebtStatus::Normal.is_terminal());
        assert!(!DebtStatus::FinalDeletion.is_terminal());
    }
}
