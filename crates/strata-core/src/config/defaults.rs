//! Default configuration values

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "strata.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "strata.yaml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".strata.toml",
        ".strata.yaml",
    ]
}

/// Starter configuration written by documentation and tests
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Strata Configuration

[tasks]
cacheable_operations = ["build", "test", "lint"]
shared_inputs = ["package.json", "strata.toml"]

[tasks.cache]
enabled = true
dir = ".strata/cache"

[targets.build]
command = "mkdir -p dist/{root} && cp -R {root}/src/. dist/{root}/"
outputs = ["dist/{root}"]

[targets.lint]
command = "echo linting {project}"
"#;
