//! Document store trait.

use async_trait::async_trait;

use crate::events::Doc;
use crate::result::AppResult;
use crate::types::prefixer::Prefix;
use crate::types::query::FindRequest;

/// Per-tenant JSON document storage.
///
/// Implementations announce every successful write on the realtime hub.
/// Missing documents are reported with [`ErrorKind::NotFound`](crate::error::ErrorKind::NotFound).
#[async_trait]
pub trait DocumentStore: Send + Sync + std::fmt::Debug + 'static {
    /// Fetch one document.
    async fn get(&self, prefix: &Prefix, doctype: &str, id: &str) -> AppResult<Doc>;

    /// Insert a document. An empty `id` is replaced by a generated one.
    async fn create(&self, prefix: &Prefix, doc: &mut Doc) -> AppResult<()>;

    /// Replace an existing document.
    async fn update(&self, prefix: &Prefix, doc: &Doc) -> AppResult<()>;

    /// Remove a document.
    async fn delete(&self, prefix: &Prefix, doc: &Doc) -> AppResult<()>;

    /// Query documents with a selector, sort and limit.
    async fn find_docs(&self, prefix: &Prefix, req: &FindRequest) -> AppResult<Vec<Doc>>;

    /// Visit every document of a doctype.
    async fn foreach_docs(
        &self,
        prefix: &Prefix,
        doctype: &str,
        f: &mut (dyn FnMut(Doc) -> AppResult<()> + Send),
    ) -> AppResult<()>;

    /// Declare an index on a doctype. Declaring the same index twice is a no-op.
    async fn define_index(
        &self,
        prefix: &Prefix,
        doctype: &str,
        name: &str,
        fields: &[&str],
    ) -> AppResult<()>;

    /// All tenants known to the store.
    async fn prefixes(&self) -> AppResult<Vec<Prefix>>;
}
