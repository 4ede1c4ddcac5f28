//! Resource documents parsed from YAML templates
//!
//! A [`ResourceDocument`] is an opaque Kubernetes object. The deployer only
//! reads its identity (`apiVersion`, `kind`, `metadata.name`,
//! `metadata.namespace`) and rewrites the few fields it mutates.

use std::path::Path;

use kube::api::GroupVersionKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// One Kubernetes object in JSON form
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceDocument {
    value: Value,
}

impl ResourceDocument {
    /// Wrap a JSON value, checking that it carries an identity
    pub fn new(value: Value) -> Result<Self> {
        let doc = Self { value };
        doc.api_version()?;
        doc.kind()?;
        doc.name()?;
        Ok(doc)
    }

    /// Serialize a typed object (e.g. a `Subscription`) into a document
    pub fn from_object<T: Serialize>(object: &T) -> Result<Self> {
        Self::new(serde_json::to_value(object)?)
    }

    /// Build an identity-only document, enough to address a delete
    pub fn reference(api_version: &str, kind: &str, name: &str) -> Self {
        Self {
            value: serde_json::json!({
                "apiVersion": api_version,
                "kind": kind,
                "metadata": { "name": name },
            }),
        }
    }

    /// Parse every non-empty document in a multi-document YAML string
    pub fn parse_all(yaml: &str) -> Result<Vec<Self>> {
        let mut docs = Vec::new();
        for de in serde_yaml::Deserializer::from_str(yaml) {
            let value = Value::deserialize(de)?;
            if value.is_null() {
                continue;
            }
            docs.push(Self::new(value)?);
        }
        Ok(docs)
    }

    /// Read and parse a template file
    pub fn read_all(path: &Path) -> Result<Vec<Self>> {
        let yaml = std::fs::read_to_string(path).map_err(|e| Error::FatalInstall {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse_all(&yaml)
    }

    /// Render a list of documents as multi-document YAML
    pub fn render_all(docs: &[Self]) -> Result<String> {
        let mut out = String::new();
        for (i, doc) in docs.iter().enumerate() {
            if i > 0 {
                out.push_str("---\n");
            }
            out.push_str(&serde_yaml::to_string(&doc.value)?);
        }
        Ok(out)
    }

    pub fn api_version(&self) -> Result<&str> {
        self.str_at("/apiVersion")
    }

    pub fn kind(&self) -> Result<&str> {
        self.str_at("/kind")
    }

    pub fn name(&self) -> Result<&str> {
        self.str_at("/metadata/name")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.value
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
    }

    /// Group/version/kind of this document
    pub fn gvk(&self) -> Result<GroupVersionKind> {
        let (group, version) = match self.api_version()?.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version()?),
        };
        Ok(GroupVersionKind::gvk(group, version, self.kind()?))
    }

    /// `Kind/name` label for logs
    pub fn display_name(&self) -> String {
        format!(
            "{}/{}",
            self.kind().unwrap_or("?"),
            self.name().unwrap_or("?")
        )
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Deserialize into a typed object
    pub fn to_object<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }

    fn str_at(&self, pointer: &str) -> Result<&str> {
        self.value
            .pointer(pointer)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MalformedManifest(format!("missing {pointer}")))
    }
}
