//! Integration tests for the stowage binary

use std::process::Command;

/// Helper to run the stowage binary
fn stowage(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_stowage"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute stowage")
}

mod crdgen_command {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_crdgen_prints_every_definition() {
        let output = stowage(&["crdgen"]);
        assert!(output.status.success(), "crdgen failed: {}", String::from_utf8_lossy(&output.stderr));

        let stdout = String::from_utf8_lossy(&output.stdout);
        let names: Vec<String> = serde_yaml::Deserializer::from_str(&stdout)
            .map(|doc| {
                let value = serde_yaml::Value::deserialize(doc).expect("valid YAML document");
                value["metadata"]["name"].as_str().unwrap_or_default().to_string()
            })
            .collect();

        assert_eq!(
            names,
            vec![
                "addonsets.stowage.io",
                "helmaddons.stowage.io",
                "manifestaddons.stowage.io",
                "issueraddons.stowage.io",
                "manifestrecords.stowage.io",
            ]
        );
    }

    #[test]
    fn test_crdgen_status_subresource() {
        let output = stowage(&["crdgen"]);
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("subresources:"));
        assert!(stdout.contains("x-kubernetes-preserve-unknown-fields: true"));
    }
}

mod help_output {
    use super::*;

    #[test]
    fn test_run_help_lists_flags() {
        let output = stowage(&["run", "--help"]);
        assert!(output.status.success());

        let stdout = String::from_utf8_lossy(&output.stdout);
        for flag in ["--namespace", "--requeue-interval", "--operation-timeout", "--await-timeout", "--log-level", "--log-json"] {
            assert!(stdout.contains(flag), "missing {} in help", flag);
        }
    }

    #[test]
    fn test_unknown_command_fails() {
        let output = stowage(&["install"]);
        assert!(!output.status.success());
    }
}
