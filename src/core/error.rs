use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidValue,
    ConfigInvalidJson,

    ValidationInvalidArgument,
    ValidationArityMismatch,

    RegistryUnknownUnit,
    RegistryDuplicateUnit,
    RegistryLocked,

    PlanDependencyNotReady,
    PlanInvalidGraph,

    ChainConfirmationTimeout,
    ChainTransactionReverted,
    ChainRpcFailed,

    CapabilityConflict,
    ArtifactNotFound,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",
            ErrorCode::ValidationArityMismatch => "validation.arity_mismatch",

            ErrorCode::RegistryUnknownUnit => "registry.unknown_unit",
            ErrorCode::RegistryDuplicateUnit => "registry.duplicate_unit",
            ErrorCode::RegistryLocked => "registry.locked",

            ErrorCode::PlanDependencyNotReady => "plan.dependency_not_ready",
            ErrorCode::PlanInvalidGraph => "plan.invalid_graph",

            ErrorCode::ChainConfirmationTimeout => "chain.confirmation_timeout",
            ErrorCode::ChainTransactionReverted => "chain.transaction_reverted",
            ErrorCode::ChainRpcFailed => "chain.rpc_failed",

            ErrorCode::CapabilityConflict => "capability.conflict",
            ErrorCode::ArtifactNotFound => "artifact.not_found",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingConfigurationDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArityMismatchDetails {
    pub action: String,
    pub targets: usize,
    pub selectors: usize,
    pub labels: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitDetails {
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyNotReadyDetails {
    pub unit: String,
    pub dependency: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationTimeoutDetails {
    pub name: String,
    pub transaction_hash: String,
    pub confirmations: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRevertedDetails {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityConflictDetails {
    pub asset: String,
    pub target: String,
    pub selector: String,
    pub existing_label: String,
    pub requested_label: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    /// A required external parameter is absent or empty.
    pub fn missing_configuration(key: impl Into<String>, path: Option<String>) -> Self {
        let key = key.into();
        Self::new(
            ErrorCode::ConfigMissingKey,
            format!("{} is not set", key),
            to_details(MissingConfigurationDetails {
                key: key.clone(),
                path,
            }),
        )
        .with_hint(format!("Export {} or add it to the .env file", key))
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            to_details(InvalidValueDetails {
                key: key.into(),
                value,
                problem: problem.into(),
            }),
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            serde_json::json!({ "path": path.into(), "error": err.to_string() }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            to_details(InvalidArgumentDetails {
                field: field.into(),
                problem: problem.into(),
                id,
                tried,
            }),
        )
    }

    pub fn arity_mismatch(
        action: impl Into<String>,
        targets: usize,
        selectors: usize,
        labels: usize,
    ) -> Self {
        let action = action.into();
        Self::new(
            ErrorCode::ValidationArityMismatch,
            format!(
                "{}: targets ({}), selectors ({}) and labels ({}) must have equal length",
                action, targets, selectors, labels
            ),
            to_details(ArityMismatchDetails {
                action,
                targets,
                selectors,
                labels,
            }),
        )
    }

    pub fn unknown_unit(unit: impl Into<String>, network: Option<String>) -> Self {
        let unit = unit.into();
        Self::new(
            ErrorCode::RegistryUnknownUnit,
            format!("No deployment recorded for '{}'", unit),
            to_details(UnitDetails { unit, network }),
        )
        .with_hint("Run 'delegation-deploy status <network>' to see recorded units")
    }

    pub fn duplicate_unit(unit: impl Into<String>, network: Option<String>) -> Self {
        let unit = unit.into();
        Self::new(
            ErrorCode::RegistryDuplicateUnit,
            format!("'{}' is already recorded in this namespace", unit),
            to_details(UnitDetails {
                unit: unit.clone(),
                network,
            }),
        )
        .with_hint(format!("Pass '--redeploy {}' to replace the record", unit))
    }

    pub fn registry_locked(
        network: impl Into<String>,
        lock_path: impl Into<String>,
        holder_pid: Option<u32>,
    ) -> Self {
        let network = network.into();
        let lock_path = lock_path.into();
        let hint = match holder_pid {
            Some(pid) => format!(
                "Wait for process {} to finish. If it is no longer running, delete {}",
                pid, lock_path
            ),
            None => format!("Wait for the other run to finish, or delete {} if it crashed", lock_path),
        };
        Self::new(
            ErrorCode::RegistryLocked,
            format!("Another provisioning run holds the '{}' namespace", network),
            serde_json::json!({ "network": network, "lockPath": lock_path, "holderPid": holder_pid }),
        )
        .with_hint(hint)
    }

    /// A unit was reached before one of its dependencies was recorded.
    pub fn dependency_not_ready(unit: impl Into<String>, dependency: impl Into<String>) -> Self {
        let unit = unit.into();
        let dependency = dependency.into();
        Self::new(
            ErrorCode::PlanDependencyNotReady,
            format!(
                "'{}' requires '{}', which has not been deployed yet",
                unit, dependency
            ),
            to_details(DependencyNotReadyDetails { unit, dependency }),
        )
    }

    pub fn invalid_graph(problem: impl Into<String>, units: Option<Vec<String>>) -> Self {
        Self::new(
            ErrorCode::PlanInvalidGraph,
            problem,
            serde_json::json!({ "units": units }),
        )
    }

    pub fn confirmation_timeout(
        name: impl Into<String>,
        transaction_hash: impl Into<String>,
        confirmations: u64,
        timeout_secs: u64,
    ) -> Self {
        let name = name.into();
        let mut err = Self::new(
            ErrorCode::ChainConfirmationTimeout,
            format!("Timed out waiting for '{}' to confirm", name),
            to_details(ConfirmationTimeoutDetails {
                name,
                transaction_hash: transaction_hash.into(),
                confirmations,
                timeout_secs,
            }),
        )
        .with_hint("Re-running waits for this transaction again instead of sending a new one");
        err.retryable = Some(true);
        err
    }

    pub fn transaction_reverted(
        name: impl Into<String>,
        transaction_hash: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let reason = reason.into();
        Self::new(
            ErrorCode::ChainTransactionReverted,
            format!("Transaction for '{}' reverted: {}", name, reason),
            to_details(TransactionRevertedDetails {
                name,
                transaction_hash,
                reason,
            }),
        )
    }

    pub fn rpc_failed(method: impl Into<String>, error: impl Into<String>) -> Self {
        let method = method.into();
        let error = error.into();
        Self::new(
            ErrorCode::ChainRpcFailed,
            format!("RPC call {} failed: {}", method, error),
            serde_json::json!({ "method": method, "error": error }),
        )
    }

    pub fn capability_conflict(details: CapabilityConflictDetails) -> Self {
        Self::new(
            ErrorCode::CapabilityConflict,
            "Capability already granted with a different label",
            to_details(details),
        )
    }

    pub fn artifact_not_found(kind: impl Into<String>, artifacts_dir: impl Into<String>) -> Self {
        let kind = kind.into();
        Self::new(
            ErrorCode::ArtifactNotFound,
            format!("No compiled artifact found for contract '{}'", kind),
            serde_json::json!({ "contract": kind, "artifactsDir": artifacts_dir.into() }),
        )
        .with_hint("Compile the contracts first (e.g. 'npx hardhat compile')")
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            to_details(InternalErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    /// Attach the unit or configuration action that was in flight.
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        if let Value::Object(ref mut map) = self.details {
            map.entry("step".to_string())
                .or_insert_with(|| Value::String(step.into()));
        }
        self
    }
}
