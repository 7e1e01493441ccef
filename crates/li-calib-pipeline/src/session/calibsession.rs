//! Generic session container.

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use super::problem_type::{InvalidationPolicy, ProblemType};
use super::types::{ExportRecord, LogEntry, SessionMetadata};

/// Mutable container for one calibration run.
///
/// Holds one input, one config, the problem state and at most one output.
/// Replacing the input or config applies the problem's [`InvalidationPolicy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "P: ProblemType")]
pub struct CalibrationSession<P: ProblemType> {
    pub metadata: SessionMetadata,
    pub config: P::Config,
    input: Option<P::Input>,
    pub state: P::State,
    output: Option<P::Output>,
    pub exports: Vec<ExportRecord<P::Export>>,
    /// Operation log, one entry per step.
    pub log: Vec<LogEntry>,
}

impl<P: ProblemType> CalibrationSession<P> {
    // ─────────────────────────────────────────────────────────────────────────
    // Construction
    // ─────────────────────────────────────────────────────────────────────────

    pub fn new() -> Self {
        Self::from_metadata(SessionMetadata::new(P::name(), P::schema_version()))
    }

    pub fn with_description(description: impl Into<String>) -> Self {
        Self::from_metadata(SessionMetadata::with_description(
            P::name(),
            P::schema_version(),
            description,
        ))
    }

    /// New session with validated input.
    pub fn with_input(input: P::Input) -> Result<Self> {
        let mut session = Self::new();
        session.set_input(input)?;
        Ok(session)
    }

    fn from_metadata(metadata: SessionMetadata) -> Self {
        Self {
            metadata,
            config: P::Config::default(),
            input: None,
            state: P::State::default(),
            output: None,
            exports: Vec::new(),
            log: Vec::new(),
        }
    }

    fn invalidate(&mut self, policy: InvalidationPolicy) {
        if policy.clear_state {
            self.state = P::State::default();
        }
        if policy.clear_output {
            self.output = None;
        }
        if policy.clear_exports {
            self.exports.clear();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Input and config
    // ─────────────────────────────────────────────────────────────────────────

    pub fn set_input(&mut self, input: P::Input) -> Result<()> {
        P::validate_input(&input)?;
        self.invalidate(P::on_input_change());
        self.input = Some(input);
        self.metadata.touch();
        Ok(())
    }

    pub fn input(&self) -> Option<&P::Input> {
        self.input.as_ref()
    }

    pub fn require_input(&self) -> Result<&P::Input> {
        self.input.as_ref().ok_or_else(|| anyhow!("input not set"))
    }

    pub fn set_config(&mut self, config: P::Config) -> Result<()> {
        P::validate_config(&config)?;
        self.invalidate(P::on_config_change());
        self.config = config;
        self.metadata.touch();
        Ok(())
    }

    /// Check input, config and their combination.
    pub fn validate(&self) -> Result<()> {
        let input = self.require_input()?;
        P::validate_input(input)?;
        P::validate_config(&self.config)?;
        P::validate_input_config(input, &self.config)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Output and exports
    // ─────────────────────────────────────────────────────────────────────────

    pub fn output(&self) -> Option<&P::Output> {
        self.output.as_ref()
    }

    pub fn set_output(&mut self, output: P::Output) {
        self.output = Some(output);
        self.metadata.touch();
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Convert the output and record the export.
    pub fn export(&mut self) -> Result<P::Export> {
        let export = self.export_peek()?;
        self.exports.push(ExportRecord::new(export.clone()));
        self.metadata.touch();
        Ok(export)
    }

    /// Convert the output without recording it.
    pub fn export_peek(&self) -> Result<P::Export> {
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| anyhow!("output not computed"))?;
        P::export(output, &self.config)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Log and reset
    // ─────────────────────────────────────────────────────────────────────────

    pub fn log_success_with_notes(
        &mut self,
        operation: impl Into<String>,
        notes: impl Into<String>,
    ) {
        self.log.push(LogEntry::success_with_notes(operation, notes));
        self.metadata.touch();
    }

    pub fn log_failure(&mut self, operation: impl Into<String>, error: impl Into<String>) {
        self.log.push(LogEntry::failure(operation, error));
        self.metadata.touch();
    }

    /// Drop state and output, keeping input, config and log.
    pub fn reset_state(&mut self) {
        self.invalidate(InvalidationPolicy::CLEAR_COMPUTED);
        self.metadata.touch();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Serialization
    // ─────────────────────────────────────────────────────────────────────────

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a session, rejecting schema versions newer than this build.
    pub fn from_json(json: &str) -> Result<Self> {
        let session: Self = serde_json::from_str(json)?;
        if session.metadata.problem_type != P::name() {
            bail!(
                "session holds problem {:?}, expected {:?}",
                session.metadata.problem_type,
                P::name()
            );
        }
        if session.metadata.schema_version > P::schema_version() {
            bail!(
                "session schema version {} is newer than supported version {}",
                session.metadata.schema_version,
                P::schema_version()
            );
        }
        Ok(session)
    }
}

impl<P: ProblemType> Default for CalibrationSession<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::ensure;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct CountConfig {
        scale: f64,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct CountState {
        total: Option<f64>,
    }

    #[derive(Debug)]
    struct CountProblem;

    impl ProblemType for CountProblem {
        type Config = CountConfig;
        type Input = Vec<f64>;
        type State = CountState;
        type Output = f64;
        type Export = String;

        fn name() -> &'static str {
            "count"
        }

        fn validate_input(input: &Self::Input) -> Result<()> {
            ensure!(!input.is_empty(), "input cannot be empty");
            Ok(())
        }

        fn validate_config(config: &Self::Config) -> Result<()> {
            ensure!(config.scale >= 0.0, "scale must be non-negative");
            Ok(())
        }

        fn export(output: &Self::Output, config: &Self::Config) -> Result<Self::Export> {
            Ok(format!("{:.1}", output * config.scale))
        }
    }

    #[test]
    fn input_change_clears_computed_results() {
        let mut session = CalibrationSession::<CountProblem>::with_input(vec![1.0, 2.0]).unwrap();
        session.state.total = Some(3.0);
        session.set_output(3.0);
        session.export().unwrap();

        session.set_input(vec![4.0]).unwrap();
        assert!(session.state.total.is_none());
        assert!(!session.has_output());
        assert_eq!(session.exports.len(), 1);
    }

    #[test]
    fn invalid_input_and_config_are_rejected() {
        let mut session = CalibrationSession::<CountProblem>::new();
        assert!(session.set_input(Vec::new()).is_err());
        assert!(session.input().is_none());
        assert!(session.validate().is_err());
        assert!(session.set_config(CountConfig { scale: -1.0 }).is_err());
        assert_eq!(session.config.scale, 0.0);
    }

    #[test]
    fn export_uses_config() {
        let mut session = CalibrationSession::<CountProblem>::new();
        assert!(session.export().is_err());
        session.config.scale = 2.0;
        session.set_output(1.5);
        assert_eq!(session.export().unwrap(), "3.0");
        assert_eq!(session.exports[0].export, "3.0");
    }

    #[test]
    fn reset_keeps_input_and_log() {
        let mut session = CalibrationSession::<CountProblem>::with_input(vec![2.0]).unwrap();
        session.state.total = Some(2.0);
        session.set_output(2.0);
        session.log_failure("sum", "overflow");

        session.reset_state();
        assert!(session.state.total.is_none());
        assert!(session.output().is_none());
        assert!(session.input().is_some());
        assert_eq!(session.log.len(), 1);
    }

    #[test]
    fn json_roundtrip_checks_problem_and_schema() {
        let mut session = CalibrationSession::<CountProblem>::with_description("demo");
        session.set_input(vec![1.0]).unwrap();
        session.log_success_with_notes("sum", "1.0");

        let json = session.to_json().unwrap();
        let restored = CalibrationSession::<CountProblem>::from_json(&json).unwrap();
        assert_eq!(restored.input(), Some(&vec![1.0]));
        assert_eq!(restored.log, session.log);

        let future = json.replace("\"schema_version\": 1", "\"schema_version\": 9");
        assert!(CalibrationSession::<CountProblem>::from_json(&future).is_err());
        let other = json.replace("\"problem_type\": \"count\"", "\"problem_type\": \"other\"");
        assert!(CalibrationSession::<CountProblem>::from_json(&other).is_err());
    }
}
