use bytes::Bytes;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// A file as received by the gateway, before it has an identity.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    pub description: String,
    pub tags: Option<String>,
    pub bytes: Bytes,
}

impl UploadRequest {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            size: bytes.len() as u64,
            description: String::new(),
            tags: None,
            bytes,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }
}

/// Searchable metadata about an uploaded file, keyed by `id`.
///
/// Every attribute is persisted as a string; see [`FileRecordAttributes`].
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
#[serde(into = "FileRecordAttributes", try_from = "FileRecordAttributes")]
pub struct FileRecord {
    pub id: String,
    pub file_name: String,
    pub file_type: String,
    pub size: u64,
    #[builder(default)]
    pub description: String,
    #[builder(default)]
    pub tags: Option<String>,
}

impl FileRecord {
    pub fn from_request(id: &str, request: &UploadRequest) -> Self {
        Self {
            id: id.to_string(),
            file_name: request.file_name.clone(),
            file_type: request.content_type.clone(),
            size: request.size,
            description: request.description.clone(),
            tags: request.tags.clone(),
        }
    }
}

/// Storage layout of a [`FileRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecordAttributes {
    id: String,
    file_name: String,
    file_type: String,
    size: String,
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tags: Option<String>,
}

impl From<FileRecord> for FileRecordAttributes {
    fn from(record: FileRecord) -> Self {
        Self {
            id: record.id,
            file_name: record.file_name,
            file_type: record.file_type,
            size: record.size.to_string(),
            description: record.description,
            tags: record.tags,
        }
    }
}

impl TryFrom<FileRecordAttributes> for FileRecord {
    type Error = String;

    fn try_from(attributes: FileRecordAttributes) -> Result<Self, Self::Error> {
        let size = attributes.size.parse::<u64>().map_err(|e| {
            format!(
                "invalid size attribute {:?} for record {}: {}",
                attributes.size, attributes.id, e
            )
        })?;
        Ok(Self {
            id: attributes.id,
            file_name: attributes.file_name,
            file_type: attributes.file_type,
            size,
            description: attributes.description,
            tags: attributes.tags,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_size_follows_bytes() {
        let request = UploadRequest::new("cat.png", "image/png", Bytes::from_static(b"12345"))
            .with_description("a cat")
            .with_tags("pets,cats");
        assert_eq!(request.size, 5);
        assert_eq!(request.description, "a cat");
        assert_eq!(request.tags.as_deref(), Some("pets,cats"));
    }

    #[test]
    fn test_record_attributes_are_strings() {
        let record = FileRecordBuilder::default()
            .id("20240101T000000.000000000Z_abcdefgh_cat.png")
            .file_name("cat.png")
            .file_type("image/png")
            .size(1024u64)
            .description("a cat")
            .build()
            .unwrap();

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "20240101T000000.000000000Z_abcdefgh_cat.png",
                "fileName": "cat.png",
                "fileType": "image/png",
                "size": "1024",
                "description": "a cat",
            })
        );

        let decoded: FileRecord = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_tags_are_kept_when_present() {
        let request = UploadRequest::new("a.txt", "text/plain", Bytes::new()).with_tags("");
        let record = FileRecord::from_request("id-1", &request);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["tags"], json!(""));
        assert_eq!(value["size"], json!("0"));
    }

    #[test]
    fn test_invalid_size_is_rejected() {
        let result = serde_json::from_value::<FileRecord>(json!({
            "id": "x",
            "fileName": "a",
            "fileType": "b",
            "size": "not-a-number",
            "description": "",
        }));
        assert!(result.is_err());
    }
}
