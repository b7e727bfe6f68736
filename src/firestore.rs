//! Firestore REST adapter for the hosted catalog.
//!
//! Documents arrive as typed Firestore values (`{"stringValue": ..}`,
//! `{"mapValue": {"fields": ..}}`, ...). They are flattened into plain JSON
//! with [`decode_fields`] and then deserialized with serde into the remote
//! document shapes below.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::model::{LocalizedString, ServiceDetail, ServiceSummary};
use crate::remote::{RemoteCatalog, RemoteError};

const FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";
const SERVICES_COLLECTION: &str = "services";
const DETAILS_COLLECTION: &str = "service_details";
const CATALOG_DOCUMENT: &str = "config/catalog";
const PAGE_SIZE: u32 = 300;

// ============================================================================
// Client
// ============================================================================

/// Client for a Firestore database holding the service catalog.
pub struct FirestoreCatalog {
    project_id: String,
    api_key: Option<String>,
    id_token: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

/// A raw Firestore document.
#[derive(Debug, Deserialize)]
struct Document {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl Document {
    fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    fn decode<T: DeserializeOwned>(&self) -> Result<T, RemoteError> {
        serde_json::from_value(decode_fields(&self.fields))
            .map_err(|e| RemoteError::Parse(format!("{}: {e}", self.name)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<Document>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunQueryItem {
    document: Option<Document>,
}

impl FirestoreCatalog {
    /// Create a client from the environment.
    ///
    /// Reads `SHEBA_FIREBASE_PROJECT` (required), `SHEBA_FIREBASE_API_KEY`
    /// and `SHEBA_ID_TOKEN` (both optional).
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::MissingConfig`] if the project id is not set.
    pub fn from_env() -> Result<Self, RemoteError> {
        let project_id = std::env::var("SHEBA_FIREBASE_PROJECT")
            .map_err(|_| RemoteError::MissingConfig("SHEBA_FIREBASE_PROJECT"))?;
        let mut catalog = Self::new(project_id);
        catalog.api_key = std::env::var("SHEBA_FIREBASE_API_KEY").ok();
        catalog.id_token = std::env::var("SHEBA_ID_TOKEN").ok();
        Ok(catalog)
    }

    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            api_key: None,
            id_token: None,
            base_url: FIRESTORE_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Identity token of the signed-in user, required for writes.
    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        self.id_token = Some(id_token.into());
        self
    }

    /// Point at a different endpoint, e.g. the local emulator.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn documents_url(&self) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents",
            self.base_url.trim_end_matches('/'),
            self.project_id
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            builder = builder.query(&[("key", key)]);
        }
        if let Some(token) = &self.id_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn get_document(&self, path: &str) -> Result<Option<Document>, RemoteError> {
        let url = format!("{}/{path}", self.documents_url());
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| RemoteError::Http(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let document = response
            .error_for_status()
            .map_err(|e| RemoteError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))?;
        Ok(Some(document))
    }

    async fn list_collection(&self, collection: &str) -> Result<Vec<Document>, RemoteError> {
        let url = format!("{}/{collection}", self.documents_url());
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .request(reqwest::Method::GET, &url)
                .query(&[("pageSize", PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let page: ListResponse = request
                .send()
                .await
                .map_err(|e| RemoteError::Http(e.to_string()))?
                .error_for_status()
                .map_err(|e| RemoteError::Http(e.to_string()))?
                .json()
                .await
                .map_err(|e| RemoteError::Parse(e.to_string()))?;

            documents.extend(page.documents);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("Listed {} documents from '{collection}'", documents.len());
        Ok(documents)
    }
}

#[async_trait]
impl RemoteCatalog for FirestoreCatalog {
    async fn catalog_version(&self) -> Result<i64, RemoteError> {
        let document = self
            .get_document(CATALOG_DOCUMENT)
            .await?
            .ok_or_else(|| RemoteError::Parse(format!("{CATALOG_DOCUMENT} does not exist")))?;
        let config: RemoteCatalogConfig = document.decode()?;
        Ok(config.version)
    }

    async fn fetch_services(&self) -> Result<Vec<ServiceSummary>, RemoteError> {
        let documents = self.list_collection(SERVICES_COLLECTION).await?;
        Ok(decode_all(&documents, RemoteService::into_summary))
    }

    async fn fetch_service_details(&self) -> Result<Vec<ServiceDetail>, RemoteError> {
        let documents = self.list_collection(DETAILS_COLLECTION).await?;
        Ok(decode_all(&documents, RemoteDetail::into_detail))
    }

    async fn fetch_service_detail(
        &self,
        service_id: &str,
    ) -> Result<Option<ServiceDetail>, RemoteError> {
        let path = format!("{DETAILS_COLLECTION}/{service_id}");
        match self.get_document(&path).await? {
            Some(document) => {
                let detail: RemoteDetail = document.decode()?;
                Ok(Some(detail.into_detail(document.id())))
            }
            None => Ok(None),
        }
    }

    async fn search_by_keywords(
        &self,
        tokens: &[String],
    ) -> Result<Vec<ServiceSummary>, RemoteError> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}:runQuery", self.documents_url());
        let items: Vec<RunQueryItem> = self
            .request(reqwest::Method::POST, &url)
            .json(&keyword_query(tokens))
            .send()
            .await
            .map_err(|e| RemoteError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| RemoteError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))?;

        let documents: Vec<Document> = items.into_iter().filter_map(|i| i.document).collect();
        Ok(decode_all(&documents, RemoteService::into_summary))
    }

    async fn publish_service(
        &self,
        service: &ServiceSummary,
        detail: Option<&ServiceDetail>,
    ) -> Result<(), RemoteError> {
        if self.id_token.is_none() {
            return Err(RemoteError::NotSignedIn);
        }

        self.patch_document(
            &format!("{SERVICES_COLLECTION}/{}", service.id),
            &service_document(service),
        )
        .await?;
        if let Some(detail) = detail {
            self.patch_document(
                &format!("{DETAILS_COLLECTION}/{}", detail.service_id),
                &detail_document(detail),
            )
            .await?;
        }
        Ok(())
    }
}

impl FirestoreCatalog {
    async fn patch_document(&self, path: &str, plain: &Value) -> Result<(), RemoteError> {
        let url = format!("{}/{path}", self.documents_url());
        let fields = match encode_value(plain) {
            Value::Object(mut typed) => typed
                .remove("mapValue")
                .and_then(|m| m.get("fields").cloned())
                .unwrap_or_else(|| json!({})),
            _ => json!({}),
        };

        self.request(reqwest::Method::PATCH, &url)
            .json(&json!({ "fields": fields }))
            .send()
            .await
            .map_err(|e| RemoteError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        debug!("Published {path}");
        Ok(())
    }
}

// ============================================================================
// Remote Document Shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct RemoteCatalogConfig {
    version: i64,
}

/// Localized text as stored remotely: a language map or a bare string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RemoteText {
    Plain(String),
    Pair {
        #[serde(default)]
        en: String,
        #[serde(default)]
        bn: String,
    },
}

impl RemoteText {
    fn localize(text: Option<RemoteText>) -> LocalizedString {
        match text {
            Some(RemoteText::Plain(s)) => LocalizedString::uniform(s),
            Some(RemoteText::Pair { en, bn }) => LocalizedString::new(en, bn),
            None => LocalizedString::default(),
        }
    }
}

/// Epoch milliseconds or an RFC 3339 timestamp.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RemoteTimestamp {
    Millis(i64),
    Float(f64),
    Text(String),
}

impl RemoteTimestamp {
    fn millis(stamp: Option<RemoteTimestamp>) -> i64 {
        match stamp {
            Some(RemoteTimestamp::Millis(ms)) => ms,
            Some(RemoteTimestamp::Float(ms)) => ms as i64,
            Some(RemoteTimestamp::Text(text)) => chrono::DateTime::parse_from_rfc3339(&text)
                .map(|dt| dt.timestamp_millis())
                .unwrap_or_else(|e| {
                    warn!("Unparsable remote timestamp '{text}': {e}");
                    0
                }),
            None => 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteService {
    id: Option<String>,
    title: Option<RemoteText>,
    subtitle: Option<RemoteText>,
    #[serde(default)]
    icon: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    version_added: i64,
    last_updated: Option<RemoteTimestamp>,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    image_names: Vec<String>,
    #[serde(default)]
    search_keywords: Vec<String>,
}

impl RemoteService {
    fn into_summary(self, document_id: &str) -> ServiceSummary {
        ServiceSummary {
            id: self
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| document_id.to_string()),
            title: RemoteText::localize(self.title),
            subtitle: RemoteText::localize(self.subtitle),
            icon: self.icon,
            category: self.category,
            version_added: self.version_added,
            last_updated: RemoteTimestamp::millis(self.last_updated),
            images: self.images,
            image_names: self.image_names,
            search_keywords: self.search_keywords,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteDetail {
    service_id: Option<String>,
    instructions: Option<RemoteText>,
    required_documents: Option<RemoteText>,
    processing_time: Option<RemoteText>,
    contact_info: Option<RemoteText>,
    youtube_link: Option<String>,
    last_updated: Option<RemoteTimestamp>,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    image_names: Vec<String>,
}

impl RemoteDetail {
    fn into_detail(self, document_id: &str) -> ServiceDetail {
        ServiceDetail {
            service_id: self
                .service_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| document_id.to_string()),
            instructions: RemoteText::localize(self.instructions),
            required_documents: RemoteText::localize(self.required_documents),
            processing_time: RemoteText::localize(self.processing_time),
            contact_info: RemoteText::localize(self.contact_info),
            youtube_link: self.youtube_link.filter(|link| !link.trim().is_empty()),
            last_updated: RemoteTimestamp::millis(self.last_updated),
            images: self.images,
            image_names: self.image_names,
        }
    }
}

/// Decode every document, skipping (and logging) the malformed ones.
fn decode_all<R, T>(documents: &[Document], convert: fn(R, &str) -> T) -> Vec<T>
where
    R: DeserializeOwned,
{
    documents
        .iter()
        .filter_map(|document| match document.decode::<R>() {
            Ok(raw) => Some(convert(raw, document.id())),
            Err(e) => {
                warn!("Skipping malformed document: {e}");
                None
            }
        })
        .collect()
}

fn keyword_query(tokens: &[String]) -> Value {
    let values: Vec<Value> = tokens.iter().map(|t| json!({ "stringValue": t })).collect();
    json!({
        "structuredQuery": {
            "from": [{ "collectionId": SERVICES_COLLECTION }],
            "where": {
                "fieldFilter": {
                    "field": { "fieldPath": "searchKeywords" },
                    "op": "ARRAY_CONTAINS_ANY",
                    "value": { "arrayValue": { "values": values } }
                }
            }
        }
    })
}

fn localized_json(text: &LocalizedString) -> Value {
    json!({ "en": text.en, "bn": text.bn })
}

fn service_document(service: &ServiceSummary) -> Value {
    json!({
        "id": service.id,
        "title": localized_json(&service.title),
        "subtitle": localized_json(&service.subtitle),
        "icon": service.icon,
        "category": service.category,
        "versionAdded": service.version_added,
        "lastUpdated": service.last_updated,
        "images": service.images,
        "imageNames": service.image_names,
        "searchKeywords": service.search_keywords,
    })
}

fn detail_document(detail: &ServiceDetail) -> Value {
    json!({
        "serviceId": detail.service_id,
        "instructions": localized_json(&detail.instructions),
        "requiredDocuments": localized_json(&detail.required_documents),
        "processingTime": localized_json(&detail.processing_time),
        "contactInfo": localized_json(&detail.contact_info),
        "youtubeLink": detail.youtube_link,
        "lastUpdated": detail.last_updated,
        "images": detail.images,
        "imageNames": detail.image_names,
    })
}

// ============================================================================
// Typed Value Codec
// ============================================================================

/// Flatten a Firestore `fields` map into a plain JSON object.
///
/// Null fields are left out, so a stored `nullValue` reads the same as a
/// missing field and picks up the serde default.
pub fn decode_fields(fields: &Map<String, Value>) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(name, value)| (name.clone(), decode_value(value)))
            .filter(|(_, value)| !value.is_null())
            .collect(),
    )
}

/// Flatten one typed Firestore value. Unknown shapes become `null`.
pub fn decode_value(value: &Value) -> Value {
    let Some(typed) = value.as_object() else {
        return Value::Null;
    };

    if let Some(v) = typed.get("stringValue") {
        return v.clone();
    }
    if let Some(v) = typed.get("integerValue") {
        // Firestore serializes int64 as a decimal string.
        return match v {
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
            other => other.clone(),
        };
    }
    for key in ["doubleValue", "booleanValue", "timestampValue", "referenceValue"] {
        if let Some(v) = typed.get(key) {
            return v.clone();
        }
    }
    if let Some(array) = typed.get("arrayValue") {
        let values = array
            .get("values")
            .and_then(Value::as_array)
            .map(|values| values.iter().map(decode_value).collect())
            .unwrap_or_default();
        return Value::Array(values);
    }
    if let Some(map) = typed.get("mapValue") {
        return match map.get("fields").and_then(Value::as_object) {
            Some(fields) => decode_fields(fields),
            None => Value::Object(Map::new()),
        };
    }
    Value::Null
}

/// Encode a plain JSON value as a typed Firestore value.
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(values) => {
            let values: Vec<Value> = values.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(fields) => {
            let fields: Map<String, Value> = fields
                .iter()
                .map(|(name, value)| (name.clone(), encode_value(value)))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn document(name: &str, fields: Value) -> Document {
        Document {
            name: name.to_string(),
            fields: fields.as_object().cloned().unwrap_or_default(),
        }
    }

    // --- typed values ---

    #[test]
    fn test_decode_scalars() {
        assert_eq!(decode_value(&json!({"stringValue": "x"})), json!("x"));
        assert_eq!(decode_value(&json!({"integerValue": "42"})), json!(42));
        assert_eq!(decode_value(&json!({"doubleValue": 1.5})), json!(1.5));
        assert_eq!(decode_value(&json!({"booleanValue": true})), json!(true));
        assert_eq!(decode_value(&json!({"nullValue": null})), Value::Null);
    }

    #[test]
    fn test_decode_nested() {
        let typed = json!({
            "mapValue": {"fields": {
                "en": {"stringValue": "Passport"},
                "tags": {"arrayValue": {"values": [{"stringValue": "a"}, {"stringValue": "b"}]}}
            }}
        });
        assert_eq!(
            decode_value(&typed),
            json!({"en": "Passport", "tags": ["a", "b"]})
        );
    }

    #[test]
    fn test_decode_empty_array_and_map() {
        assert_eq!(decode_value(&json!({"arrayValue": {}})), json!([]));
        assert_eq!(decode_value(&json!({"mapValue": {}})), json!({}));
    }

    #[test]
    fn test_encode_then_decode_preserves_plain_json() {
        let plain = json!({"n": 3, "s": "x", "list": ["a"], "nested": {"ok": false}});
        let typed = encode_value(&plain);
        assert_eq!(typed["mapValue"]["fields"]["n"], json!({"integerValue": "3"}));
        assert_eq!(decode_value(&typed), plain);
    }

    // --- documents ---

    #[test]
    fn test_service_document_with_language_maps() {
        let doc = document(
            "projects/p/databases/(default)/documents/services/passport",
            json!({
                "title": {"mapValue": {"fields": {
                    "en": {"stringValue": "E-Passport"},
                    "bn": {"stringValue": "ই-পাসপোর্ট"}
                }}},
                "subtitle": {"stringValue": "Apply online"},
                "category": {"stringValue": "travel"},
                "versionAdded": {"integerValue": "2"},
                "lastUpdated": {"timestampValue": "2024-01-01T00:00:00Z"},
                "searchKeywords": {"arrayValue": {"values": [{"stringValue": "passport"}]}}
            }),
        );

        let raw: RemoteService = doc.decode().unwrap();
        let summary = raw.into_summary(doc.id());
        assert_eq!(summary.id, "passport");
        assert_eq!(summary.title.bn, "ই-পাসপোর্ট");
        assert_eq!(summary.subtitle, LocalizedString::uniform("Apply online"));
        assert_eq!(summary.version_added, 2);
        assert_eq!(summary.last_updated, 1_704_067_200_000);
        assert_eq!(summary.search_keywords, vec!["passport"]);
        assert!(summary.images.is_empty());
    }

    #[test]
    fn test_detail_document_falls_back_to_document_id() {
        let doc = document(
            "projects/p/databases/(default)/documents/service_details/nid",
            json!({
                "instructions": {"mapValue": {"fields": {"bn": {"stringValue": "ধাপ ১"}}}},
                "youtubeLink": {"stringValue": ""},
                "lastUpdated": {"integerValue": "1700000000000"}
            }),
        );

        let raw: RemoteDetail = doc.decode().unwrap();
        let detail = raw.into_detail(doc.id());
        assert_eq!(detail.service_id, "nid");
        assert_eq!(detail.instructions.en, "ধাপ ১");
        assert!(detail.youtube_link.is_none());
        assert_eq!(detail.last_updated, 1_700_000_000_000);
    }

    #[test]
    fn test_decode_all_skips_malformed() {
        let docs = vec![
            document("x/services/ok", json!({"category": {"stringValue": "a"}})),
            document("x/services/bad", json!({"versionAdded": {"stringValue": "two"}})),
        ];
        let services = decode_all(&docs, RemoteService::into_summary);
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].id, "ok");
    }

    #[test]
    fn test_null_fields_read_as_missing() {
        let docs = vec![document(
            "x/services/passport",
            json!({
                "title": {"mapValue": {"fields": {"en": {"stringValue": "E-Passport"}}}},
                "icon": {"nullValue": null},
                "category": {"nullValue": null},
                "versionAdded": {"nullValue": null},
                "images": {"nullValue": null},
                "imageNames": {"nullValue": null},
                "searchKeywords": {"nullValue": null}
            }),
        )];

        let services = decode_all(&docs, RemoteService::into_summary);
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].id, "passport");
        assert_eq!(services[0].title.en, "E-Passport");
        assert!(services[0].icon.is_empty());
        assert_eq!(services[0].version_added, 0);
        assert!(services[0].images.is_empty());
        assert!(services[0].search_keywords.is_empty());

        let details = decode_all(
            &[document(
                "x/service_details/passport",
                json!({"images": {"nullValue": null}, "youtubeLink": {"nullValue": null}}),
            )],
            RemoteDetail::into_detail,
        );
        assert_eq!(details.len(), 1);
        assert!(details[0].images.is_empty());
        assert!(details[0].youtube_link.is_none());
    }

    #[test]
    fn test_decode_fields_drops_nulls_in_nested_maps() {
        let fields = json!({
            "a": {"nullValue": null},
            "m": {"mapValue": {"fields": {"b": {"nullValue": null}, "c": {"stringValue": "x"}}}}
        });
        assert_eq!(
            decode_fields(fields.as_object().unwrap()),
            json!({"m": {"c": "x"}})
        );
    }

    #[test]
    fn test_catalog_config_decodes_version() {
        let doc = document("x/config/catalog", json!({"version": {"integerValue": "3"}}));
        let config: RemoteCatalogConfig = doc.decode().unwrap();
        assert_eq!(config.version, 3);
    }

    #[test]
    fn test_keyword_query_shape() {
        let query = keyword_query(&["passport".into(), "renew".into()]);
        let filter = &query["structuredQuery"]["where"]["fieldFilter"];
        assert_eq!(filter["op"], "ARRAY_CONTAINS_ANY");
        assert_eq!(filter["field"]["fieldPath"], "searchKeywords");
        assert_eq!(filter["value"]["arrayValue"]["values"][1]["stringValue"], "renew");
    }

    #[test]
    fn test_service_document_round_trips_through_codec() {
        let summary = crate::model::fixtures::service("passport", "E-Passport", "ই-পাসপোর্ট");
        let typed = encode_value(&service_document(&summary));
        let fields = typed["mapValue"]["fields"].as_object().unwrap().clone();
        let doc = Document {
            name: "x/services/passport".into(),
            fields,
        };
        let raw: RemoteService = doc.decode().unwrap();
        assert_eq!(raw.into_summary(doc.id()), summary);
    }

    // --- client ---

    #[tokio::test]
    async fn test_publish_requires_sign_in() {
        let catalog = FirestoreCatalog::new("demo").with_base_url("http://127.0.0.1:9");
        let summary = crate::model::fixtures::service("a", "Alpha", "আলফা");
        let result = catalog.publish_service(&summary, None).await;
        assert!(matches!(result, Err(RemoteError::NotSignedIn)));
    }

    #[tokio::test]
    async fn test_empty_token_search_skips_network() {
        let catalog = FirestoreCatalog::new("demo").with_base_url("http://127.0.0.1:9");
        assert!(catalog.search_by_keywords(&[]).await.unwrap().is_empty());
    }

    /// Serve one canned `(status, body)` per connection, recording each
    /// request line.
    fn start_scripted_server(
        responses: Vec<(u16, Value)>,
    ) -> (String, std::thread::JoinHandle<Vec<String>>) {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let handle = std::thread::spawn(move || {
            let mut request_lines = Vec::new();
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().expect("accept");
                let mut head = Vec::new();
                let mut buf = [0u8; 4096];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).expect("read request");
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&buf[..n]);
                }
                let head = String::from_utf8_lossy(&head);
                request_lines.push(head.lines().next().unwrap_or_default().to_string());

                let body = body.to_string();
                let resp = format!(
                    "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(resp.as_bytes()).expect("write response");
            }
            request_lines
        });

        (format!("http://{addr}/v1"), handle)
    }

    fn service_doc(id: &str) -> Value {
        json!({
            "name": format!("projects/demo/databases/(default)/documents/services/{id}"),
            "fields": {"title": {"stringValue": id}}
        })
    }

    #[tokio::test]
    async fn test_list_collection_follows_page_tokens() {
        let (base_url, server) = start_scripted_server(vec![
            (200, json!({"documents": [service_doc("a"), service_doc("b")], "nextPageToken": "p2"})),
            (200, json!({"documents": [service_doc("c")], "nextPageToken": ""})),
        ]);
        let catalog = FirestoreCatalog::new("demo").with_base_url(base_url);

        let services = catalog.fetch_services().await.unwrap();
        let ids: Vec<&str> = services.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let requests = server.join().expect("join server thread");
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with("GET /v1/projects/demo/databases/(default)/documents/services?"));
        assert!(!requests[0].contains("pageToken"));
        assert!(requests[1].contains("pageToken=p2"));
    }

    #[tokio::test]
    async fn test_missing_document_is_none() {
        let (base_url, server) = start_scripted_server(vec![(
            404,
            json!({"error": {"code": 404, "status": "NOT_FOUND"}}),
        )]);
        let catalog = FirestoreCatalog::new("demo").with_base_url(base_url);

        let detail = catalog.fetch_service_detail("passport").await.unwrap();
        assert!(detail.is_none());

        let requests = server.join().expect("join server thread");
        assert!(requests[0].contains("/documents/service_details/passport"));
    }

    #[tokio::test]
    async fn test_list_collection_server_error_is_http() {
        let (base_url, server) = start_scripted_server(vec![(500, json!({}))]);
        let catalog = FirestoreCatalog::new("demo").with_base_url(base_url);

        let result = catalog.fetch_service_details().await;
        assert!(matches!(result, Err(RemoteError::Http(_))));
        server.join().expect("join server thread");
    }

    #[test]
    fn test_documents_url() {
        let catalog = FirestoreCatalog::new("sheba-demo").with_base_url("http://localhost:8080/v1/");
        assert_eq!(
            catalog.documents_url(),
            "http://localhost:8080/v1/projects/sheba-demo/databases/(default)/documents"
        );
    }
}
