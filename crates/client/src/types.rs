use serde::{Deserialize, Serialize};

/// JSON body posted to the chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatBody<'a> {
    pub query: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UploadReport {
    #[serde(default)]
    pub chunks_count: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DocumentStatus {
    #[serde(default)]
    pub document_count: u64,
    #[serde(default)]
    pub has_documents: bool,
}

/// Backend status. Older servers report the single-document fields instead of `documents`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatusReport {
    #[serde(default)]
    pub documents: Option<DocumentStatus>,
    #[serde(default)]
    pub app_status: Option<String>,
    #[serde(default)]
    pub pdf_loaded: Option<bool>,
    #[serde(default)]
    pub pdf_path: Option<String>,
    #[serde(default)]
    pub openai_configured: Option<bool>,
}

impl StatusReport {
    pub fn has_documents(&self) -> bool {
        match self.documents {
            Some(documents) => documents.has_documents,
            None => self.pdf_loaded.unwrap_or(false),
        }
    }

    pub fn document_count(&self) -> u64 {
        match self.documents {
            Some(documents) => documents.document_count,
            None => u64::from(self.pdf_loaded.unwrap_or(false)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthReport {
    pub status: String,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reads_document_block() {
        let report: StatusReport = serde_json::from_str(
            r#"{"documents":{"document_count":3,"has_documents":true}}"#,
        )
        .unwrap();
        assert!(report.has_documents());
        assert_eq!(report.document_count(), 3);
    }

    #[test]
    fn status_falls_back_to_pdf_flag() {
        let report: StatusReport = serde_json::from_str(
            r#"{"app_status":"healthy","pdf_loaded":true,"pdf_path":"rag_docs/handbook.pdf","openai_configured":false}"#,
        )
        .unwrap();
        assert!(report.documents.is_none());
        assert!(report.has_documents());
        assert_eq!(report.document_count(), 1);
        assert_eq!(report.openai_configured, Some(false));
    }

    #[test]
    fn upload_report_fields_are_optional() {
        let report: UploadReport = serde_json::from_str("{}").unwrap();
        assert_eq!(report, UploadReport::default());

        let report: UploadReport = serde_json::from_str(r#"{"chunks_count":12}"#).unwrap();
        assert_eq!(report.chunks_count, Some(12));
    }

    #[test]
    fn chat_body_serializes_query() {
        let body = serde_json::to_string(&ChatBody { query: "hi" }).unwrap();
        assert_eq!(body, r#"{"query":"hi"}"#);
    }
}
