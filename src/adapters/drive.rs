use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{build_client, json_or_upstream, trim_base, DEFAULT_TIMEOUT};
use crate::credentials::GoogleAuth;
use crate::error::{AvaBotError, Result};
use crate::interfaces::services::{DriveFile, DriveService};

const FILE_FIELDS: &str = "id,name,mimeType,webViewLink";
const LIST_PAGE_SIZE: &str = "10";

pub struct GoogleDriveClient {
    auth: Arc<GoogleAuth>,
    base_url: String,
    client: reqwest::Client,
}

impl GoogleDriveClient {
    pub fn new(auth: Arc<GoogleAuth>, base_url: &str) -> Result<Self> {
        Ok(Self {
            auth,
            base_url: trim_base(base_url),
            client: build_client(DEFAULT_TIMEOUT)?,
        })
    }
}

fn file_from_value(value: &Value) -> DriveFile {
    let text = |key: &str| value.get(key).and_then(|v| v.as_str()).map(str::to_string);
    DriveFile {
        id: text("id").unwrap_or_default(),
        name: text("name"),
        mime_type: text("mimeType"),
        web_view_link: text("webViewLink"),
    }
}

/// `multipart/related` body: JSON metadata part followed by the file bytes.
pub fn multipart_body(boundary: &str, metadata: &Value, mime_type: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[async_trait]
impl DriveService for GoogleDriveClient {
    async fn upload_file(&self, path: &Path, folder_id: Option<&str>) -> Result<DriveFile> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                AvaBotError::Validation(format!("not a file path: {}", path.display()))
            })?;
        let content = tokio::fs::read(path).await.map_err(|e| {
            AvaBotError::Validation(format!("cannot read {}: {e}", path.display()))
        })?;
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();

        let mut metadata = json!({ "name": name });
        if let Some(folder_id) = folder_id {
            metadata["parents"] = json!([folder_id]);
        }
        let boundary = format!("ava-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_body(&boundary, &metadata, &mime_type, &content);

        let token = self.auth.access_token().await?;
        info!(file = %name, bytes = content.len(), "uploading file to drive");
        let response = self
            .client
            .post(format!("{}/upload/drive/v3/files", self.base_url))
            .bearer_auth(&token)
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await?;
        let created = json_or_upstream(response).await?;
        Ok(file_from_value(&created))
    }

    async fn list_files(&self, query: Option<&str>) -> Result<Vec<DriveFile>> {
        let token = self.auth.access_token().await?;
        let fields = format!("files({FILE_FIELDS})");
        let mut params = vec![("pageSize", LIST_PAGE_SIZE), ("fields", fields.as_str())];
        if let Some(query) = query {
            params.push(("q", query));
        }
        let response = self
            .client
            .get(format!("{}/drive/v3/files", self.base_url))
            .bearer_auth(&token)
            .query(&params)
            .send()
            .await?;
        let body = json_or_upstream(response).await?;
        Ok(body
            .get("files")
            .and_then(|v| v.as_array())
            .map(|files| files.iter().map(file_from_value).collect())
            .unwrap_or_default())
    }
}

pub fn format_files(files: &[DriveFile]) -> String {
    if files.is_empty() {
        return "No encontré archivos en tu Drive.".to_string();
    }
    let mut out = String::from("Archivos en tu Drive:\n");
    for file in files {
        out.push_str(&format!(
            "- {} ({})\n",
            file.name.as_deref().unwrap_or(&file.id),
            file.mime_type.as_deref().unwrap_or("desconocido")
        ));
    }
    out.trim_end().to_string()
}
