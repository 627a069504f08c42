// src/fetch/sheets.rs
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};
use url::Url;

use super::{DocumentSource, FetchError, RowRange};
use crate::model::DocumentDescriptor;

const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const SHEETS_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";
/// Row used as the end of an open range.
const LAST_ROW: usize = 1_000_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Spreadsheets in one Drive folder, read through the Sheets values API.
/// Authentication is a pre-acquired OAuth bearer token.
#[derive(Debug, Clone)]
pub struct SheetsSource {
    client: Client,
    token: String,
    folder_id: String,
    sheet_name: String,
}

impl SheetsSource {
    pub fn new(
        client: Client,
        token: impl Into<String>,
        folder_id: impl Into<String>,
        sheet_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token: token.into(),
            folder_id: folder_id.into(),
            sheet_name: sheet_name.into(),
        }
    }

    /// A1 notation for whole rows, e.g. `Research!5:1000000`.
    fn a1_range(&self, range: RowRange) -> String {
        format!(
            "{}!{}:{}",
            self.sheet_name,
            range.start,
            range.end.unwrap_or(LAST_ROW)
        )
    }

    fn values_url(&self, spreadsheet_id: &str, range: RowRange) -> Result<Url, FetchError> {
        let mut url =
            Url::parse(SHEETS_URL).map_err(|e| FetchError::Decode(format!("base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| FetchError::Decode("sheets url cannot be a base".into()))?
            .push(spreadsheet_id)
            .push("values")
            .push(&self.a1_range(range));
        url.query_pairs_mut()
            .append_pair("valueRenderOption", "UNFORMATTED_VALUE");
        Ok(url)
    }

    fn list_url(&self, page_token: Option<&str>) -> Result<Url, FetchError> {
        let mut url = Url::parse(DRIVE_FILES_URL)
            .map_err(|e| FetchError::Decode(format!("base url: {}", e)))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair(
                "q",
                &format!(
                    "'{}' in parents and mimeType = '{}' and trashed = false",
                    self.folder_id, SPREADSHEET_MIME
                ),
            )
            .append_pair("fields", "nextPageToken, files(id, name)")
            .append_pair("pageSize", "1000")
            .append_pair("includeItemsFromAllDrives", "true")
            .append_pair("supportsAllDrives", "true");
            if let Some(token) = page_token {
                q.append_pair("pageToken", token);
            }
        }
        Ok(url)
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        req: RequestBuilder,
        what: &str,
    ) -> Result<T, FetchError> {
        let resp = req.bearer_auth(&self.token).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(format!("{}: {}", what, e)))
    }
}

#[async_trait]
impl DocumentSource for SheetsSource {
    #[instrument(level = "info", skip(self), fields(folder = %self.folder_id))]
    async fn list_documents(&self) -> Result<Vec<DocumentDescriptor>, FetchError> {
        let mut docs = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = self.list_url(page_token.as_deref())?;
            let page: FileList = self.send_json(self.client.get(url), "drive folder").await?;
            debug!(files = page.files.len(), "listed page");
            docs.extend(
                page.files
                    .into_iter()
                    .map(|f| DocumentDescriptor::new(f.id, f.name)),
            );
            match page.next_page_token {
                Some(t) if !t.is_empty() => page_token = Some(t),
                _ => break,
            }
        }
        info!(documents = docs.len(), "listed spreadsheets");
        Ok(docs)
    }

    async fn fetch_rows(
        &self,
        document: &DocumentDescriptor,
        range: RowRange,
    ) -> Result<Vec<Vec<String>>, FetchError> {
        let url = self.values_url(&document.id, range)?;
        let body: ValueRange = self.send_json(self.client.get(url), &document.name).await?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect())
    }
}

/// Render an unformatted cell value the way it reads in the sheet.
fn cell_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
