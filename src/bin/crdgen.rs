//! # CRD Generator
//!
//! Generates the CustomResourceDefinitions of the operator from the Rust type
//! definitions using `kube::CustomResourceExt`.
//!
//! ## Usage
//!
//! ```bash
//! # Generate CRD YAML
//! cargo run --bin crdgen > config/crd/external-secrets-operator.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use external_secrets_operator::crd::{
    ExternalSecretsConfig, ExternalSecretsManager, ExternalSecretsOperator,
};
use kube::core::CustomResourceExt;

fn main() {
    let crds = [
        ExternalSecretsConfig::crd(),
        ExternalSecretsManager::crd(),
        ExternalSecretsOperator::crd(),
    ];

    println!("# This file is auto-generated by crdgen");
    println!("# DO NOT EDIT THIS FILE MANUALLY");
    println!("# Change the types under src/crd/ and regenerate");
    for crd in &crds {
        match serde_yaml::to_string(crd) {
            Ok(yaml) => {
                println!("---");
                print!("{yaml}");
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
}
