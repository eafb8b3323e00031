use serde::{Deserialize, Serialize};

use crate::error::ExportError;

/// Integration schemes understood by the external integrator generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IntegratorType {
    #[serde(rename = "INT_IRK_GL2")]
    GaussLegendre2,
    #[serde(rename = "INT_IRK_GL4")]
    GaussLegendre4,
    #[serde(rename = "INT_IRK_GL6")]
    GaussLegendre6,
    #[serde(rename = "INT_IRK_GL8")]
    GaussLegendre8,
    #[serde(rename = "INT_IRK_RIIA1")]
    RadauIIA1,
    #[default]
    #[serde(rename = "INT_IRK_RIIA3")]
    RadauIIA3,
    #[serde(rename = "INT_IRK_RIIA5")]
    RadauIIA5,
    #[serde(rename = "INT_RK1")]
    ExplicitRk1,
    #[serde(rename = "INT_RK2")]
    ExplicitRk2,
    #[serde(rename = "INT_RK3")]
    ExplicitRk3,
    #[serde(rename = "INT_RK4")]
    ExplicitRk4,
}

impl IntegratorType {
    /// Tag passed to the external generator
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegratorType::GaussLegendre2 => "INT_IRK_GL2",
            IntegratorType::GaussLegendre4 => "INT_IRK_GL4",
            IntegratorType::GaussLegendre6 => "INT_IRK_GL6",
            IntegratorType::GaussLegendre8 => "INT_IRK_GL8",
            IntegratorType::RadauIIA1 => "INT_IRK_RIIA1",
            IntegratorType::RadauIIA3 => "INT_IRK_RIIA3",
            IntegratorType::RadauIIA5 => "INT_IRK_RIIA5",
            IntegratorType::ExplicitRk1 => "INT_RK1",
            IntegratorType::ExplicitRk2 => "INT_RK2",
            IntegratorType::ExplicitRk3 => "INT_RK3",
            IntegratorType::ExplicitRk4 => "INT_RK4",
        }
    }

    /// Whether the scheme can handle algebraic variables
    pub fn is_implicit(&self) -> bool {
        !matches!(
            self,
            IntegratorType::ExplicitRk1
                | IntegratorType::ExplicitRk2
                | IntegratorType::ExplicitRk3
                | IntegratorType::ExplicitRk4
        )
    }
}

impl std::fmt::Display for IntegratorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_num_intervals() -> usize {
    1
}

fn default_num_integrator_steps() -> usize {
    10
}

/// Options for exporting an integrator.
///
/// Options are validated whenever they are built, so a value of this type is always
/// acceptable to the generator as far as this crate can tell.
///
/// ```rust
/// use daexport::export::{IntegratorOptions, IntegratorType};
///
/// let opts = IntegratorOptions::from_json(
///     r#"{ "timestep": 0.02, "integratorType": "INT_IRK_GL4", "numIntegratorSteps": 5 }"#,
/// ).unwrap();
/// assert_eq!(opts.integrator_type(), IntegratorType::GaussLegendre4);
/// assert_eq!(opts.num_intervals(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IntegratorOptions {
    #[serde(default = "default_num_intervals")]
    num_intervals: usize,
    timestep: f64,
    #[serde(default)]
    integrator_type: IntegratorType,
    #[serde(default)]
    integrator_grid: Option<Vec<f64>>,
    #[serde(default = "default_num_integrator_steps")]
    num_integrator_steps: usize,
}

impl IntegratorOptions {
    /// Default options for the given timestep
    pub fn new(timestep: f64) -> Result<Self, ExportError> {
        let opts = IntegratorOptions {
            num_intervals: default_num_intervals(),
            timestep,
            integrator_type: IntegratorType::default(),
            integrator_grid: None,
            num_integrator_steps: default_num_integrator_steps(),
        };
        opts.validate()?;
        Ok(opts)
    }

    pub fn from_json(json: &str) -> Result<Self, ExportError> {
        let opts: IntegratorOptions = serde_json::from_str(json)
            .map_err(|e| ExportError::InvalidOptions(format!("failed to parse options: {}", e)))?;
        opts.validate()?;
        Ok(opts)
    }

    pub fn to_json(&self) -> Result<String, ExportError> {
        serde_json::to_string(self)
            .map_err(|e| ExportError::InvalidOptions(format!("failed to serialize options: {}", e)))
    }

    pub fn with_num_intervals(mut self, num_intervals: usize) -> Result<Self, ExportError> {
        self.num_intervals = num_intervals;
        self.validate()?;
        Ok(self)
    }

    pub fn with_integrator_type(mut self, integrator_type: IntegratorType) -> Self {
        self.integrator_type = integrator_type;
        self
    }

    pub fn with_num_integrator_steps(mut self, steps: usize) -> Result<Self, ExportError> {
        self.num_integrator_steps = steps;
        self.validate()?;
        Ok(self)
    }

    /// Uses an explicit, normalized integration grid instead of equidistant steps
    pub fn with_integrator_grid(mut self, grid: Vec<f64>) -> Result<Self, ExportError> {
        self.integrator_grid = Some(grid);
        self.validate()?;
        Ok(self)
    }

    pub fn num_intervals(&self) -> usize {
        self.num_intervals
    }

    pub fn timestep(&self) -> f64 {
        self.timestep
    }

    pub fn integrator_type(&self) -> IntegratorType {
        self.integrator_type
    }

    pub fn integrator_grid(&self) -> Option<&[f64]> {
        self.integrator_grid.as_deref()
    }

    pub fn num_integrator_steps(&self) -> usize {
        self.num_integrator_steps
    }

    fn validate(&self) -> Result<(), ExportError> {
        if self.num_intervals == 0 {
            return Err(ExportError::InvalidOptions(
                "numIntervals must be positive".into(),
            ));
        }
        if !(self.timestep.is_finite() && self.timestep > 0.0) {
            return Err(ExportError::InvalidOptions(format!(
                "timestep must be a positive number, got {}",
                self.timestep
            )));
        }
        if self.num_integrator_steps == 0 {
            return Err(ExportError::InvalidOptions(
                "numIntegratorSteps must be positive".into(),
            ));
        }
        if let Some(grid) = &self.integrator_grid {
            if grid.len() != self.num_integrator_steps + 1 {
                return Err(ExportError::InvalidOptions(format!(
                    "integratorGrid needs numIntegratorSteps + 1 = {} points, got {}",
                    self.num_integrator_steps + 1,
                    grid.len()
                )));
            }
            if let Some(bad) = grid.iter().find(|t| !t.is_finite()) {
                return Err(ExportError::InvalidOptions(format!(
                    "integratorGrid points must be finite, got {}",
                    bad
                )));
            }
            if grid.first() != Some(&0.0) {
                return Err(ExportError::InvalidOptions(
                    "integratorGrid must start at 0".into(),
                ));
            }
            if grid.windows(2).any(|w| !(w[1] > w[0])) {
                return Err(ExportError::InvalidOptions(
                    "integratorGrid must be strictly increasing".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = IntegratorOptions::new(0.1).unwrap();
        assert_eq!(opts.num_intervals(), 1);
        assert_eq!(opts.num_integrator_steps(), 10);
        assert_eq!(opts.integrator_type(), IntegratorType::RadauIIA3);
        assert!(opts.integrator_grid().is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(IntegratorOptions::new(0.0).is_err());
        assert!(IntegratorOptions::new(f64::NAN).is_err());
        let opts = IntegratorOptions::new(0.1).unwrap();
        assert!(opts.clone().with_num_intervals(0).is_err());
        assert!(opts.clone().with_num_integrator_steps(0).is_err());
    }

    #[test]
    fn test_grid_validation() {
        let opts = IntegratorOptions::new(0.1)
            .unwrap()
            .with_num_integrator_steps(2)
            .unwrap();
        assert!(opts.clone().with_integrator_grid(vec![0.0, 0.3, 1.0]).is_ok());
        assert!(opts.clone().with_integrator_grid(vec![0.0, 1.0]).is_err());
        assert!(opts.clone().with_integrator_grid(vec![0.1, 0.3, 1.0]).is_err());
        assert!(opts.with_integrator_grid(vec![0.0, 0.5, 0.5]).is_err());
    }

    #[test]
    fn test_json_roundtrip_and_unknown_fields() {
        let opts = IntegratorOptions::new(0.05)
            .unwrap()
            .with_integrator_type(IntegratorType::ExplicitRk4);
        let parsed = IntegratorOptions::from_json(&opts.to_json().unwrap()).unwrap();
        assert_eq!(parsed, opts);

        let result = IntegratorOptions::from_json(r#"{ "timestep": 0.1, "foo": 1 }"#);
        assert!(matches!(result, Err(ExportError::InvalidOptions(_))));
    }

    #[test]
    fn test_grid_must_be_finite() {
        let opts = IntegratorOptions::new(0.1)
            .unwrap()
            .with_num_integrator_steps(1)
            .unwrap();
        for end in [f64::INFINITY, f64::NAN] {
            assert!(matches!(
                opts.clone().with_integrator_grid(vec![0.0, end]),
                Err(ExportError::InvalidOptions(_))
            ));
        }
        let result = IntegratorOptions::from_json(
            r#"{ "timestep": 0.1, "numIntegratorSteps": 1, "integratorGrid": [0.0, 1e999] }"#,
        );
        assert!(matches!(result, Err(ExportError::InvalidOptions(_))));
    }

    #[test]
    fn test_json_roundtrip_with_grid() {
        let opts = IntegratorOptions::new(0.1)
            .unwrap()
            .with_num_integrator_steps(2)
            .unwrap()
            .with_integrator_grid(vec![0.0, 0.25, 1.0])
            .unwrap();
        let json = opts.to_json().unwrap();
        assert!(json.contains(r#""integratorGrid":[0.0,0.25,1.0]"#));
        assert_eq!(IntegratorOptions::from_json(&json).unwrap(), opts);
    }

    #[test]
    fn test_json_validates() {
        let result = IntegratorOptions::from_json(r#"{ "timestep": -1.0 }"#);
        assert!(matches!(result, Err(ExportError::InvalidOptions(_))));
    }
}
