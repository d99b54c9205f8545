//! Reference model upload.
//!
//! Uploads are **not idempotent**: uploading the same bytes twice yields two
//! independent models (and root sessions). Nothing is content-addressed.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use reqwest::Method;

use super::wire::IdResponse;
use super::PolyredClient;
use crate::error::{Error, Result};
use crate::models::ModelId;

/// 3-D interchange formats the service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    Fbx,
}

impl ModelFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Fbx => "fbx",
        }
    }

    /// Determine the format from a file name, rejecting anything unsupported.
    pub fn from_file_name(name: &str) -> Result<Self> {
        let extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("fbx") => Ok(Self::Fbx),
            Some(other) => Err(Error::Validation(format!(
                "only .fbx models are supported, got .{}",
                other
            ))),
            None => Err(Error::Validation(format!(
                "only .fbx models are supported, '{}' has no extension",
                name
            ))),
        }
    }
}

impl PolyredClient {
    /// Upload a reference model. The returned id doubles as the root session id.
    ///
    /// The format check happens before any network traffic.
    pub async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<ModelId> {
        let format = ModelFormat::from_file_name(file_name)?;
        if bytes.is_empty() {
            return Err(Error::Validation(format!("model '{}' is empty", file_name)));
        }

        tracing::info!(file_name, bytes = bytes.len(), format = format.extension(), "uploading model");
        let part = Part::bytes(bytes).file_name(file_name.to_string());
        let form = Form::new().part("file", part);
        let response = self
            .request(Method::POST, "/upload")
            .multipart(form)
            .send()
            .await?;
        let body: IdResponse = self.handle_response(response).await?;
        if body.id.is_empty() {
            return Err(Error::ProtocolViolation(
                "upload succeeded but returned an empty id".to_string(),
            ));
        }
        Ok(body.id)
    }

    /// Read a model from disk and upload it.
    pub async fn upload_file(&self, path: impl AsRef<Path>) -> Result<ModelId> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Validation(format!("invalid model path: {}", path.display())))?;
        ModelFormat::from_file_name(file_name)?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Validation(format!("cannot read {}: {}", path.display(), e)))?;
        self.upload(bytes, file_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_fbx_in_any_case() {
        assert_eq!(ModelFormat::from_file_name("teapot.fbx").unwrap(), ModelFormat::Fbx);
        assert_eq!(ModelFormat::from_file_name("TEAPOT.FBX").unwrap(), ModelFormat::Fbx);
        assert_eq!(ModelFormat::from_file_name("dir/cow_0.Fbx").unwrap(), ModelFormat::Fbx);
    }

    #[test]
    fn rejects_other_formats() {
        for name in ["cow_0.obj", "rose.ply", "monkey", "pumpkin.fbx.zip"] {
            let err = ModelFormat::from_file_name(name).unwrap_err();
            assert!(err.is_validation(), "{name} accepted");
        }
    }
}
