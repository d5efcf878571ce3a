//! Execution context routing
//!
//! Maps data source names and aliases to backends, and tracks which one the
//! current request selected. The selection lives in a tokio task-local, so
//! each request task sees only its own value and every override is undone
//! when its scope ends, whether the body returns, fails or panics.

use crate::backend::{self, QueryBackend};
use crate::config::AppConfig;
use crate::error::{Text2SqlError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

tokio::task_local! {
    static ACTIVE_SELECTOR: Option<String>;
}

/// Selector active for the calling task, if any scope set one
pub fn current_selector() -> Option<String> {
    ACTIVE_SELECTOR.try_with(|s| s.clone()).ok().flatten()
}

/// Runs `body` with `selector` active; the enclosing value is back in place
/// once the returned future completes or is dropped.
pub async fn with_selector<F>(selector: Option<&str>, body: F) -> F::Output
where
    F: Future,
{
    ACTIVE_SELECTOR.scope(normalize(selector), body).await
}

/// Synchronous counterpart of [`with_selector`]
pub fn with_selector_sync<F, R>(selector: Option<&str>, body: F) -> R
where
    F: FnOnce() -> R,
{
    ACTIVE_SELECTOR.sync_scope(normalize(selector), body)
}

fn normalize(selector: Option<&str>) -> Option<String> {
    selector
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

/// Process-wide, read-only map from selector to backend
pub struct BackendRouter {
    backends: HashMap<String, Arc<dyn QueryBackend>>,
    /// Canonical names in registration order
    names: Vec<String>,
    default_name: String,
}

impl BackendRouter {
    pub fn builder(default_name: &str) -> BackendRouterBuilder {
        BackendRouterBuilder {
            entries: Vec::new(),
            default_name: default_name.trim().to_lowercase(),
        }
    }

    /// Opens every configured datasource
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut builder = Self::builder(&config.default_datasource);
        for ds in &config.datasources {
            let handle = backend::open(ds)?;
            builder = builder.register(&ds.name, &ds.aliases, handle);
        }
        builder.build()
    }

    /// Total resolution: unknown or absent selectors fall back to the default
    pub fn resolve(&self, selector: Option<&str>) -> Arc<dyn QueryBackend> {
        let Some(key) = normalize(selector) else {
            debug!("No datasource selected, using default '{}'", self.default_name);
            return self.default_backend();
        };

        match self.backends.get(&key) {
            Some(handle) => handle.clone(),
            None => {
                warn!("Unknown datasource '{}', falling back to '{}'", key, self.default_name);
                self.default_backend()
            }
        }
    }

    /// Backend for the calling task's active selector
    pub fn current(&self) -> Arc<dyn QueryBackend> {
        self.resolve(current_selector().as_deref())
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Connectivity of every distinct backend, in registration order
    pub async fn health_check_all(&self) -> Vec<(String, bool)> {
        let mut report = Vec::with_capacity(self.names.len());
        for name in &self.names {
            let ok = match self.resolve(Some(name)).health_check().await {
                Ok(ok) => ok,
                Err(e) => {
                    warn!("Datasource '{}' health check failed: {}", name, e);
                    false
                }
            };
            if ok {
                info!("Datasource '{}' is reachable", name);
            }
            report.push((name.clone(), ok));
        }
        report
    }

    fn default_backend(&self) -> Arc<dyn QueryBackend> {
        // build() guarantees the default key exists
        self.backends[&self.default_name].clone()
    }
}

pub struct BackendRouterBuilder {
    entries: Vec<(String, Vec<String>, Arc<dyn QueryBackend>)>,
    default_name: String,
}

impl BackendRouterBuilder {
    pub fn register(mut self, name: &str, aliases: &[String], handle: Arc<dyn QueryBackend>) -> Self {
        self.entries.push((name.to_string(), aliases.to_vec(), handle));
        self
    }

    pub fn build(self) -> Result<BackendRouter> {
        let mut backends: HashMap<String, Arc<dyn QueryBackend>> = HashMap::new();
        let mut names = Vec::new();

        for (name, aliases, handle) in self.entries {
            let canonical = name.trim().to_lowercase();
            for key in std::iter::once(canonical.clone()).chain(aliases.iter().map(|a| a.trim().to_lowercase())) {
                if backends.insert(key.clone(), handle.clone()).is_some() {
                    return Err(Text2SqlError::Config(format!("datasource key '{}' registered twice", key)));
                }
            }
            names.push(canonical);
        }

        if !names.contains(&self.default_name) {
            return Err(Text2SqlError::Config(format!(
                "default datasource '{}' is not registered",
                self.default_name
            )));
        }

        Ok(BackendRouter {
            backends,
            names,
            default_name: self.default_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Row;
    use async_trait::async_trait;

    struct NamedBackend(&'static str);

    #[async_trait]
    impl QueryBackend for NamedBackend {
        fn name(&self) -> &str {
            self.0
        }
        async fn query(&self, _sql: &str) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }
        async fn list_tables(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn health_check(&self) -> Result<bool> {
            Ok(self.0 != "ticket-booking")
        }
    }

    fn router() -> BackendRouter {
        BackendRouter::builder("ticket-distribution")
            .register(
                "ticket-distribution",
                &["distribution".to_string(), "primary".to_string()],
                Arc::new(NamedBackend("ticket-distribution")),
            )
            .register(
                "ticket-booking",
                &["booking".to_string(), "order".to_string()],
                Arc::new(NamedBackend("ticket-booking")),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolve_names_and_aliases_case_insensitively() {
        let router = router();
        assert_eq!(router.resolve(Some("ticket-booking")).name(), "ticket-booking");
        assert_eq!(router.resolve(Some("BOOKING")).name(), "ticket-booking");
        assert_eq!(router.resolve(Some(" Order ")).name(), "ticket-booking");
        assert_eq!(router.resolve(Some("Primary")).name(), "ticket-distribution");
    }

    #[test]
    fn test_resolve_falls_back_to_default() {
        let router = router();
        assert_eq!(router.resolve(None).name(), "ticket-distribution");
        assert_eq!(router.resolve(Some("")).name(), "ticket-distribution");
        assert_eq!(router.resolve(Some("warehouse")).name(), "ticket-distribution");
    }

    #[test]
    fn test_build_rejects_missing_default_and_duplicates() {
        let missing = BackendRouter::builder("nowhere")
            .register("a", &[], Arc::new(NamedBackend("a")))
            .build();
        assert!(missing.is_err());

        let duplicate = BackendRouter::builder("a")
            .register("a", &["x".to_string()], Arc::new(NamedBackend("a")))
            .register("b", &["X".to_string()], Arc::new(NamedBackend("b")))
            .build();
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn test_scope_sets_and_restores() {
        let router = router();
        assert_eq!(current_selector(), None);

        let seen = with_selector(Some("Booking"), async { router.current().name().to_string() }).await;
        assert_eq!(seen, "ticket-booking");
        assert_eq!(current_selector(), None);
        assert_eq!(router.current().name(), "ticket-distribution");
    }

    #[tokio::test]
    async fn test_nested_scopes_restore_enclosing_value() {
        with_selector(Some("outer"), async {
            assert_eq!(current_selector().as_deref(), Some("outer"));

            with_selector(Some("inner"), async {
                assert_eq!(current_selector().as_deref(), Some("inner"));
                with_selector(None, async {
                    assert_eq!(current_selector(), None);
                })
                .await;
                assert_eq!(current_selector().as_deref(), Some("inner"));
            })
            .await;

            assert_eq!(current_selector().as_deref(), Some("outer"));
        })
        .await;
        assert_eq!(current_selector(), None);
    }

    #[tokio::test]
    async fn test_scope_restores_after_error() {
        let result: std::result::Result<(), String> = with_selector(Some("outer"), async {
            let inner: std::result::Result<(), String> =
                with_selector(Some("inner"), async { Err("boom".to_string()) }).await;
            assert_eq!(current_selector().as_deref(), Some("outer"));
            inner
        })
        .await;
        assert!(result.is_err());
        assert_eq!(current_selector(), None);
    }

    #[test]
    fn test_sync_scope_restores_after_panic() {
        with_selector_sync(Some("outer"), || {
            let caught = std::panic::catch_unwind(|| {
                with_selector_sync(Some("inner"), || panic!("body failed"));
            });
            assert!(caught.is_err());
            assert_eq!(current_selector().as_deref(), Some("outer"));
        });
        assert_eq!(current_selector(), None);
    }

    #[tokio::test]
    async fn test_concurrent_tasks_are_isolated() {
        let a = tokio::spawn(with_selector(Some("a"), async {
            tokio::task::yield_now().await;
            current_selector()
        }));
        let b = tokio::spawn(with_selector(Some("b"), async {
            tokio::task::yield_now().await;
            current_selector()
        }));
        assert_eq!(a.await.unwrap().as_deref(), Some("a"));
        assert_eq!(b.await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_health_check_all() {
        let report = router().health_check_all().await;
        assert_eq!(
            report,
            vec![
                ("ticket-distribution".to_string(), true),
                ("ticket-booking".to_string(), false)
            ]
        );
    }
}
