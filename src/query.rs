/// Query engine - shaped script calls against a target vault, normalized
/// into typed result items
use crate::{
    error::{VaultError, VaultResult},
    scripts::ID_FIELDS,
    session::SessionCache,
    transport::VaultTransport,
};
use serde_json::Value;
use std::sync::Arc;

/// Hard cap on items returned by one paginated query; callers needing more
/// page by narrowing the cursor or range
pub const MAX_QUERY_LIMIT: usize = 100;

/// Where a query fetches from: a registered script or a named collection
#[derive(Debug, Clone)]
pub enum QuerySource {
    Script(String),
    Collection(String),
}

/// Pagination window over creation time
#[derive(Debug, Clone, Copy)]
pub enum Page {
    /// Items strictly older than the timestamp, newest first, at most `limit`
    OlderThan { older_than: i64, limit: usize },
    /// Items with creation time in `[start, end]` inclusive
    Range { start: i64, end: i64 },
}

/// One remote fetch: source, equality filter, and an optional page window
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub target_did: String,
    pub source: QuerySource,
    pub filter: serde_json::Map<String, Value>,
    pub page: Option<Page>,
}

impl QuerySpec {
    /// Query through a registered script on the target's vault
    pub fn script(target_did: impl Into<String>, script_name: impl Into<String>) -> Self {
        Self {
            target_did: target_did.into(),
            source: QuerySource::Script(script_name.into()),
            filter: serde_json::Map::new(),
            page: None,
        }
    }

    /// Query a named collection directly
    pub fn collection(target_did: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            target_did: target_did.into(),
            source: QuerySource::Collection(collection.into()),
            filter: serde_json::Map::new(),
            page: None,
        }
    }

    /// Add an equality constraint
    pub fn with_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(field.into(), value.into());
        self
    }

    /// Page backwards from a timestamp (exclusive), newest first
    pub fn older_than(mut self, older_than: i64, limit: usize) -> Self {
        self.page = Some(Page::OlderThan { older_than, limit });
        self
    }

    /// Restrict to creation times in `[start, end]` inclusive
    pub fn between(mut self, start: i64, end: i64) -> Self {
        self.page = Some(Page::Range { start, end });
        self
    }

    /// Script call parameters: the filter plus the page window
    pub fn params(&self) -> Value {
        let mut params = self.filter.clone();
        match self.page {
            Some(Page::OlderThan { older_than, limit }) => {
                params.insert(
                    "created".to_string(),
                    serde_json::json!({ "$lt": older_than }),
                );
                params.insert(
                    "limit".to_string(),
                    serde_json::json!(limit.min(MAX_QUERY_LIMIT)),
                );
            }
            Some(Page::Range { start, end }) => {
                params.insert("start".to_string(), serde_json::json!(start));
                params.insert("end".to_string(), serde_json::json!(end));
            }
            None => {}
        }
        Value::Object(params)
    }
}

/// One parsed record, tagged with the vault it came from
#[derive(Debug, Clone)]
pub struct ResultItem {
    pub target_did: String,
    pub record_id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub document: Value,
}

impl ResultItem {
    /// Parse a raw record, validating the required fields
    ///
    /// The record id is the most specific of the domain id fields present.
    pub fn parse(target_did: &str, record: &Value) -> VaultResult<Self> {
        if target_did.is_empty() {
            return Err(VaultError::ParseError { field: "target_did" });
        }

        let fields = record
            .as_object()
            .ok_or(VaultError::ParseError { field: "document" })?;

        let record_id = ID_FIELDS
            .iter()
            .find_map(|field| fields.get(*field).and_then(Value::as_str))
            .ok_or(VaultError::ParseError { field: "channel_id" })?
            .to_string();

        let created_at = fields
            .get("created_at")
            .and_then(Value::as_i64)
            .ok_or(VaultError::ParseError { field: "created_at" })?;

        let updated_at = fields
            .get("updated_at")
            .and_then(Value::as_i64)
            .ok_or(VaultError::ParseError { field: "updated_at" })?;

        Ok(Self {
            target_did: target_did.to_string(),
            record_id,
            created_at,
            updated_at,
            document: record.clone(),
        })
    }
}

/// Runs shaped queries and mutations against target vaults
pub struct QueryEngine {
    sessions: Arc<SessionCache>,
    transport: Arc<dyn VaultTransport>,
    app_did: String,
}

impl QueryEngine {
    pub fn new(
        sessions: Arc<SessionCache>,
        transport: Arc<dyn VaultTransport>,
        app_did: String,
    ) -> Self {
        Self {
            sessions,
            transport,
            app_did,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionCache> {
        &self.sessions
    }

    /// Run a named registered script against a target's vault
    ///
    /// No internal retry; callers own retry policy.
    pub async fn run_script(
        &self,
        script_name: &str,
        params: Value,
        target_did: &str,
    ) -> VaultResult<Value> {
        let session = self.sessions.get_session(target_did).await?;

        let result = self
            .transport
            .call_script(
                session.endpoint(),
                session.grant(),
                script_name,
                &params,
                target_did,
                &self.app_did,
            )
            .await;

        self.wrap_remote(result, script_name, target_did).await
    }

    /// Equality-filter fetch from a collection; no match is an empty sequence
    pub async fn query_collection(
        &self,
        collection: &str,
        filter: Value,
        target_did: &str,
    ) -> VaultResult<Vec<Value>> {
        let session = self.sessions.get_session(target_did).await?;

        let result = self
            .transport
            .find_many(session.endpoint(), session.grant(), collection, &filter)
            .await;

        self.wrap_remote(result, collection, target_did).await
    }

    /// Count of records matching an equality filter
    pub async fn query_collection_count(
        &self,
        collection: &str,
        filter: Value,
        target_did: &str,
    ) -> VaultResult<usize> {
        Ok(self
            .query_collection(collection, filter, target_did)
            .await?
            .len())
    }

    /// Insert one document into a collection on the target's vault
    pub async fn insert_one(
        &self,
        collection: &str,
        document: Value,
        target_did: &str,
    ) -> VaultResult<Value> {
        let session = self.sessions.get_session(target_did).await?;

        let result = self
            .transport
            .insert_one(session.endpoint(), session.grant(), collection, &document)
            .await;

        self.wrap_remote(result, collection, target_did).await
    }

    /// Update one document matching the filter
    pub async fn update_one(
        &self,
        collection: &str,
        filter: Value,
        update: Value,
        target_did: &str,
    ) -> VaultResult<Value> {
        let session = self.sessions.get_session(target_did).await?;

        let result = self
            .transport
            .update_one(
                session.endpoint(),
                session.grant(),
                collection,
                &filter,
                &update,
            )
            .await;

        self.wrap_remote(result, collection, target_did).await
    }

    /// Delete one document matching the filter
    pub async fn delete_one(
        &self,
        collection: &str,
        filter: Value,
        target_did: &str,
    ) -> VaultResult<()> {
        let session = self.sessions.get_session(target_did).await?;

        let result = self
            .transport
            .delete_one(session.endpoint(), session.grant(), collection, &filter)
            .await;

        self.wrap_remote(result, collection, target_did).await
    }

    /// Run a query spec and normalize every raw record into a result item
    ///
    /// A single malformed record fails the whole query; partial silent data
    /// loss is worse than a visible failure.
    pub async fn fetch(&self, spec: &QuerySpec) -> VaultResult<Vec<ResultItem>> {
        let raw = match &spec.source {
            QuerySource::Script(name) => {
                let result = self
                    .run_script(name, spec.params(), &spec.target_did)
                    .await?;
                extract_items(&result)?
            }
            QuerySource::Collection(name) => {
                self.query_collection(name, Value::Object(spec.filter.clone()), &spec.target_did)
                    .await?
            }
        };

        let mut items = raw
            .iter()
            .map(|record| ResultItem::parse(&spec.target_did, record))
            .collect::<VaultResult<Vec<_>>>()?;

        normalize_page(&mut items, spec.page);
        Ok(items)
    }

    /// Single-item lookup: zero or one item; duplicate matches violate the
    /// domain's id uniqueness guarantee
    pub async fn fetch_one(&self, spec: &QuerySpec) -> VaultResult<Option<ResultItem>> {
        let mut items = self.fetch(spec).await?;

        match items.len() {
            0 => Ok(None),
            1 => Ok(items.pop()),
            n => Err(VaultError::DataIntegrityError(format!(
                "Expected at most one record, found {}",
                n
            ))),
        }
    }

    /// Wrap a transport failure, invalidating the session on a rejected grant
    async fn wrap_remote<T>(
        &self,
        result: VaultResult<T>,
        what: &str,
        target_did: &str,
    ) -> VaultResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                if matches!(e, VaultError::Unauthorized) {
                    self.sessions.invalidate(target_did).await;
                }
                Err(VaultError::RemoteCallFailed {
                    script: what.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }
}

/// Pull the item array out of a raw script result
///
/// Script results carry items under `find_message.items`; bare arrays are
/// accepted for vaults that return the rows directly.
fn extract_items(raw: &Value) -> VaultResult<Vec<Value>> {
    if let Some(items) = raw
        .get("find_message")
        .and_then(|m| m.get("items"))
        .and_then(Value::as_array)
    {
        return Ok(items.clone());
    }

    if let Some(items) = raw.get("items").and_then(Value::as_array) {
        return Ok(items.clone());
    }

    if let Some(items) = raw.as_array() {
        return Ok(items.clone());
    }

    Err(VaultError::ParseError { field: "items" })
}

/// Enforce the page window locally: creation-time descending order, window
/// bounds, and the hard item cap
fn normalize_page(items: &mut Vec<ResultItem>, page: Option<Page>) {
    match page {
        Some(Page::OlderThan { older_than, limit }) => {
            items.retain(|item| item.created_at < older_than);
            items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            items.truncate(limit.min(MAX_QUERY_LIMIT));
        }
        Some(Page::Range { start, end }) => {
            items.retain(|item| start <= item.created_at && item.created_at <= end);
            items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            items.truncate(MAX_QUERY_LIMIT);
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::{COLLECTION_CHANNELS, SCRIPT_QUERY_POSTS_BY_CHANNEL};
    use crate::testkit::engine_with_vault;
    use std::sync::atomic::Ordering;

    fn post(post_id: &str, created_at: i64) -> Value {
        serde_json::json!({
            "channel_id": "ch1",
            "post_id": post_id,
            "created_at": created_at,
            "updated_at": created_at,
            "content": format!("post {}", post_id),
        })
    }

    #[tokio::test]
    async fn test_cursor_query_bounds_and_order() {
        let (engine, vault) = engine_with_vault("did:boreal:alice");
        vault
            .seed(
                SCRIPT_QUERY_POSTS_BY_CHANNEL,
                vec![post("p1", 100), post("p2", 300), post("p3", 200), post("p4", 400)],
            )
            .await;

        let spec = QuerySpec::script("did:boreal:alice", SCRIPT_QUERY_POSTS_BY_CHANNEL)
            .with_eq("channel_id", "ch1")
            .older_than(400, 2);

        let items = engine.fetch(&spec).await.unwrap();

        // Strictly older than 400, newest first, at most 2
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].created_at, 300);
        assert_eq!(items[1].created_at, 200);
        assert!(items.iter().all(|item| item.created_at < 400));
    }

    #[tokio::test]
    async fn test_range_query_is_inclusive_and_capped() {
        let (engine, vault) = engine_with_vault("did:boreal:alice");
        let many: Vec<Value> = (0..150).map(|i| post(&format!("p{}", i), i)).collect();
        vault.seed(SCRIPT_QUERY_POSTS_BY_CHANNEL, many).await;

        let spec = QuerySpec::script("did:boreal:alice", SCRIPT_QUERY_POSTS_BY_CHANNEL)
            .with_eq("channel_id", "ch1")
            .between(10, 140);

        let items = engine.fetch(&spec).await.unwrap();

        assert_eq!(items.len(), MAX_QUERY_LIMIT);
        assert!(items
            .iter()
            .all(|item| item.created_at >= 10 && item.created_at <= 140));
        // Newest first within the window
        assert_eq!(items[0].created_at, 140);
    }

    #[tokio::test]
    async fn test_cursor_limit_is_hard_capped() {
        let (engine, vault) = engine_with_vault("did:boreal:alice");
        let many: Vec<Value> = (0..150).map(|i| post(&format!("p{}", i), i)).collect();
        vault.seed(SCRIPT_QUERY_POSTS_BY_CHANNEL, many).await;

        let spec = QuerySpec::script("did:boreal:alice", SCRIPT_QUERY_POSTS_BY_CHANNEL)
            .older_than(1000, 500);

        let items = engine.fetch(&spec).await.unwrap();
        assert_eq!(items.len(), MAX_QUERY_LIMIT);

        // The capped limit is what goes over the wire too
        let recorded = vault.last_script_params.lock().await.clone().unwrap();
        assert_eq!(recorded.1.get("limit"), Some(&serde_json::json!(100)));
    }

    #[tokio::test]
    async fn test_query_by_id_zero_one_and_duplicate() {
        let (engine, vault) = engine_with_vault("did:boreal:alice");
        vault
            .seed(
                COLLECTION_CHANNELS,
                vec![
                    serde_json::json!({
                        "channel_id": "ch1",
                        "created_at": 10,
                        "updated_at": 10,
                    }),
                    serde_json::json!({
                        "channel_id": "dup",
                        "created_at": 20,
                        "updated_at": 20,
                    }),
                    serde_json::json!({
                        "channel_id": "dup",
                        "created_at": 30,
                        "updated_at": 30,
                    }),
                ],
            )
            .await;

        let present = QuerySpec::collection("did:boreal:alice", COLLECTION_CHANNELS)
            .with_eq("channel_id", "ch1");
        let item = engine.fetch_one(&present).await.unwrap();
        assert_eq!(item.unwrap().record_id, "ch1");

        let absent = QuerySpec::collection("did:boreal:alice", COLLECTION_CHANNELS)
            .with_eq("channel_id", "nope");
        assert!(engine.fetch_one(&absent).await.unwrap().is_none());

        let duplicated = QuerySpec::collection("did:boreal:alice", COLLECTION_CHANNELS)
            .with_eq("channel_id", "dup");
        let result = engine.fetch_one(&duplicated).await;
        assert!(matches!(result, Err(VaultError::DataIntegrityError(_))));
    }

    #[tokio::test]
    async fn test_empty_collection_is_not_an_error() {
        let (engine, _vault) = engine_with_vault("did:boreal:alice");

        let records = engine
            .query_collection(COLLECTION_CHANNELS, serde_json::json!({}), "did:boreal:alice")
            .await
            .unwrap();
        assert!(records.is_empty());

        let count = engine
            .query_collection_count(COLLECTION_CHANNELS, serde_json::json!({}), "did:boreal:alice")
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_malformed_record_fails_whole_query() {
        let (engine, vault) = engine_with_vault("did:boreal:alice");
        vault
            .seed(
                SCRIPT_QUERY_POSTS_BY_CHANNEL,
                vec![
                    post("p1", 100),
                    serde_json::json!({ "post_id": "p2", "updated_at": 50 }),
                ],
            )
            .await;

        let spec = QuerySpec::script("did:boreal:alice", SCRIPT_QUERY_POSTS_BY_CHANNEL);
        let result = engine.fetch(&spec).await;

        assert!(matches!(
            result,
            Err(VaultError::ParseError { field: "created_at" })
        ));
    }

    #[tokio::test]
    async fn test_mutations_round_trip() {
        let (engine, vault) = engine_with_vault("did:boreal:me");

        engine
            .insert_one(
                COLLECTION_CHANNELS,
                serde_json::json!({
                    "channel_id": "ch9",
                    "name": "news",
                    "created_at": 1,
                    "updated_at": 1,
                }),
                "did:boreal:me",
            )
            .await
            .unwrap();

        engine
            .update_one(
                COLLECTION_CHANNELS,
                serde_json::json!({ "channel_id": "ch9" }),
                serde_json::json!({ "name": "daily news" }),
                "did:boreal:me",
            )
            .await
            .unwrap();

        let rows = vault.stored(COLLECTION_CHANNELS).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&serde_json::json!("daily news")));

        engine
            .delete_one(
                COLLECTION_CHANNELS,
                serde_json::json!({ "channel_id": "ch9" }),
                "did:boreal:me",
            )
            .await
            .unwrap();
        assert!(vault.stored(COLLECTION_CHANNELS).await.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_grant_invalidates_session() {
        let (engine, vault) = engine_with_vault("did:boreal:alice");

        engine
            .query_collection(COLLECTION_CHANNELS, serde_json::json!({}), "did:boreal:alice")
            .await
            .unwrap();
        assert_eq!(vault.challenges.load(Ordering::SeqCst), 1);

        // Remote starts rejecting the grant; the call fails and the cached
        // session is dropped
        vault.reject_grants.store(true, Ordering::SeqCst);
        let result = engine
            .query_collection(COLLECTION_CHANNELS, serde_json::json!({}), "did:boreal:alice")
            .await;
        assert!(matches!(
            result,
            Err(VaultError::RemoteCallFailed { .. })
        ));
        assert_eq!(engine.sessions().live_sessions().await, 0);

        // Next call re-authenticates from scratch
        vault.reject_grants.store(false, Ordering::SeqCst);
        engine
            .query_collection(COLLECTION_CHANNELS, serde_json::json!({}), "did:boreal:alice")
            .await
            .unwrap();
        assert_eq!(vault.challenges.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_parse_names_first_missing_field() {
        let no_id = serde_json::json!({ "created_at": 1, "updated_at": 1 });
        assert!(matches!(
            ResultItem::parse("did:boreal:alice", &no_id),
            Err(VaultError::ParseError { field: "channel_id" })
        ));

        let no_updated = serde_json::json!({ "channel_id": "c", "created_at": 1 });
        assert!(matches!(
            ResultItem::parse("did:boreal:alice", &no_updated),
            Err(VaultError::ParseError { field: "updated_at" })
        ));

        let not_object = serde_json::json!([1, 2, 3]);
        assert!(matches!(
            ResultItem::parse("did:boreal:alice", &not_object),
            Err(VaultError::ParseError { field: "document" })
        ));

        assert!(matches!(
            ResultItem::parse("", &serde_json::json!({})),
            Err(VaultError::ParseError { field: "target_did" })
        ));
    }

    #[test]
    fn test_record_id_prefers_most_specific_field() {
        let comment = serde_json::json!({
            "channel_id": "c1",
            "post_id": "p1",
            "comment_id": "m1",
            "created_at": 1,
            "updated_at": 1,
        });
        let item = ResultItem::parse("did:boreal:alice", &comment).unwrap();
        assert_eq!(item.record_id, "m1");
    }

    #[test]
    fn test_extract_items_shapes() {
        let wrapped = serde_json::json!({ "find_message": { "items": [1, 2] } });
        assert_eq!(extract_items(&wrapped).unwrap().len(), 2);

        let flat = serde_json::json!({ "items": [1] });
        assert_eq!(extract_items(&flat).unwrap().len(), 1);

        let bare = serde_json::json!([1, 2, 3]);
        assert_eq!(extract_items(&bare).unwrap().len(), 3);

        let none = serde_json::json!({ "rows": [] });
        assert!(matches!(
            extract_items(&none),
            Err(VaultError::ParseError { field: "items" })
        ));
    }
}
