//! A runnable model: how to launch the engine and how its points map.

use crate::config::ModelConfig;
use crate::points::{PointError, PointTable, VariableDeclaration};
use crate::transport::LaunchSpec;

/// Everything a session needs besides run parameters. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub name: String,
    pub launch: LaunchSpec,
    /// Engine exchange slots in declaration order.
    pub variables: VariableDeclaration,
    /// External id bindings onto those slots.
    pub points: PointTable,
}

impl Model {
    pub fn new(
        name: &str,
        launch: LaunchSpec,
        variables: VariableDeclaration,
        points: PointTable,
    ) -> Self {
        Self {
            name: name.to_string(),
            launch,
            variables,
            points,
        }
    }

    /// Loads the descriptor files named by `config`.
    ///
    /// # Errors
    ///
    /// Returns a `PointError` if either descriptor file cannot be read or parsed.
    pub fn load(config: &ModelConfig) -> Result<Self, PointError> {
        let variables = VariableDeclaration::from_toml_file(&config.variables)?;
        let points = PointTable::from_json_file(&config.points)?;
        let launch = LaunchSpec {
            executable: config.executable.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
        };
        Ok(Self::new(&config.name, launch, variables, points))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn load_reads_both_descriptor_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let variables = dir.path().join("variables.toml");
        let points = dir.path().join("points.json");
        fs::write(
            &variables,
            "[[variable]]\nrole = \"output\"\ntype = \"Zone Temp\"\nname = \"EnergyPlus\"\n",
        )
        .expect("write declaration");
        fs::write(
            &points,
            r#"[{"id": "T1", "output": {"type": "Zone Temp", "name": "EnergyPlus"}}]"#,
        )
        .expect("write table");

        let config = ModelConfig {
            name: "office".to_string(),
            variables,
            points,
            executable: "energyplus".to_string(),
            args: vec!["-w".to_string(), "weather.epw".to_string()],
            working_dir: dir.path().to_path_buf(),
        };
        let model = Model::load(&config).expect("model should load");
        assert_eq!(model.name, "office");
        assert_eq!(model.variables.variables.len(), 1);
        assert_eq!(model.points.points[0].id, "T1");
        assert_eq!(model.launch.args.len(), 2);
        assert_eq!(model.launch.working_dir, dir.path());
    }

    #[test]
    fn load_fails_on_missing_declaration() {
        let config = ModelConfig {
            variables: "/nonexistent/variables.toml".into(),
            ..ModelConfig::default()
        };
        assert!(matches!(Model::load(&config), Err(PointError::Read { .. })));
    }
}
