//! Method-name to handler registry.
//!
//! One registry is usually shared (behind an `Arc`) by every [`Remote`] of a
//! [`Server`](crate::Server) or [`Client`](crate::Client); each Remote also
//! owns a small local registry for its built-in hooks. Registration may
//! happen at any time; dispatch takes a snapshot (`Arc` clone) of the hook
//! under a read lock and releases the lock before running it.
//!
//! ```ignore
//! let hooks = HookRegistry::new();
//! hooks.on_request("echo", |_remote, params| async move {
//!     Ok(params.unwrap_or(Value::Null))
//! });
//! hooks.on_request_typed("sum", |_remote, numbers: Vec<i64>| async move {
//!     Ok::<_, ErrorObject>(numbers.iter().sum::<i64>())
//! });
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::envelope::ErrorObject;
use crate::remote::Remote;

/// Boxed future returned by hooks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a request hook: becomes `result` or `error` on the wire.
pub type HookResult = std::result::Result<Value, ErrorObject>;

pub type RequestHook = Arc<dyn Fn(Remote, Option<Value>) -> BoxFuture<'static, HookResult> + Send + Sync>;
pub type NotificationHook =
    Arc<dyn Fn(Remote, Option<Value>) -> BoxFuture<'static, Result<(), ErrorObject>> + Send + Sync>;
pub type LifecycleHook = Arc<dyn Fn(Remote) -> BoxFuture<'static, ()> + Send + Sync>;

/// A handler bound to a method name.
#[derive(Clone)]
pub enum Hook {
    /// Answers a request with a result or an error.
    Request(RequestHook),
    /// Consumes a notification; any error is only logged.
    Notification(NotificationHook),
}

impl Hook {
    pub fn kind(&self) -> HookKind {
        match self {
            Self::Request(_) => HookKind::Request,
            Self::Notification(_) => HookKind::Notification,
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hook::{:?}", self.kind())
    }
}

/// Which kind of message a hook handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Request,
    Notification,
}

#[derive(Default)]
struct Tables {
    requests: HashMap<String, RequestHook>,
    notifications: HashMap<String, NotificationHook>,
    on_open: Vec<LifecycleHook>,
    on_close: Vec<LifecycleHook>,
}

/// Registry of request, notification, and lifecycle hooks.
#[derive(Default)]
pub struct HookRegistry {
    tables: RwLock<Tables>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind `hook` to `method`, returning the hook it replaced.
    pub fn register(&self, method: impl Into<String>, hook: Hook) -> Option<Hook> {
        let method = method.into();
        let mut tables = self.write();
        match hook {
            Hook::Request(hook) => tables.requests.insert(method, hook).map(Hook::Request),
            Hook::Notification(hook) => tables
                .notifications
                .insert(method, hook)
                .map(Hook::Notification),
        }
    }

    /// Remove the hook of `kind` bound to `method`.
    pub fn unregister(&self, method: &str, kind: HookKind) -> bool {
        let mut tables = self.write();
        match kind {
            HookKind::Request => tables.requests.remove(method).is_some(),
            HookKind::Notification => tables.notifications.remove(method).is_some(),
        }
    }

    /// Find the hook of `kind` bound to `method`.
    pub fn lookup(&self, method: &str, kind: HookKind) -> Option<Hook> {
        match kind {
            HookKind::Request => self.request_hook(method).map(Hook::Request),
            HookKind::Notification => self.notification_hook(method).map(Hook::Notification),
        }
    }

    pub(crate) fn request_hook(&self, method: &str) -> Option<RequestHook> {
        self.read().requests.get(method).cloned()
    }

    pub(crate) fn notification_hook(&self, method: &str) -> Option<NotificationHook> {
        self.read().notifications.get(method).cloned()
    }

    /// Registered method names of `kind`, sorted.
    pub fn methods(&self, kind: HookKind) -> Vec<String> {
        let tables = self.read();
        let mut methods: Vec<String> = match kind {
            HookKind::Request => tables.requests.keys().cloned().collect(),
            HookKind::Notification => tables.notifications.keys().cloned().collect(),
        };
        methods.sort_unstable();
        methods
    }

    /// Register a request hook from an async closure.
    pub fn on_request<F, Fut>(&self, method: impl Into<String>, hook: F)
    where
        F: Fn(Remote, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult> + Send + 'static,
    {
        let hook: RequestHook = Arc::new(
            move |remote: Remote, params: Option<Value>| -> BoxFuture<'static, HookResult> {
                Box::pin(hook(remote, params))
            },
        );
        self.register(method, Hook::Request(hook));
    }

    /// Register a request hook with typed params and result.
    ///
    /// Params that do not deserialize into `T` are answered with `-32602`
    /// without calling the hook. Absent params deserialize from `null`.
    pub fn on_request_typed<T, R, F, Fut>(&self, method: impl Into<String>, hook: F)
    where
        T: DeserializeOwned + Send + 'static,
        R: Serialize,
        F: Fn(Remote, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ErrorObject>> + Send + 'static,
    {
        let hook = Arc::new(hook);
        self.on_request(method, move |remote, params| {
            let hook = Arc::clone(&hook);
            async move {
                let params: T = serde_json::from_value(params.unwrap_or(Value::Null))
                    .map_err(|err| ErrorObject::invalid_params(err.to_string()))?;
                let result = hook(remote, params).await?;
                serde_json::to_value(result)
                    .map_err(|err| ErrorObject::internal_error(err.to_string()))
            }
        });
    }

    /// Register a notification hook from an async closure.
    pub fn on_notification<F, Fut>(&self, method: impl Into<String>, hook: F)
    where
        F: Fn(Remote, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ErrorObject>> + Send + 'static,
    {
        let hook: NotificationHook = Arc::new(
            move |remote: Remote,
                  params: Option<Value>|
                  -> BoxFuture<'static, Result<(), ErrorObject>> {
                Box::pin(hook(remote, params))
            },
        );
        self.register(method, Hook::Notification(hook));
    }

    /// Run `hook` whenever a Remote using this registry opens.
    pub fn on_open<F, Fut>(&self, hook: F)
    where
        F: Fn(Remote) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: LifecycleHook =
            Arc::new(move |remote: Remote| -> BoxFuture<'static, ()> { Box::pin(hook(remote)) });
        self.write().on_open.push(hook);
    }

    /// Run `hook` whenever a Remote using this registry closes.
    pub fn on_close<F, Fut>(&self, hook: F)
    where
        F: Fn(Remote) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: LifecycleHook =
            Arc::new(move |remote: Remote| -> BoxFuture<'static, ()> { Box::pin(hook(remote)) });
        self.write().on_close.push(hook);
    }

    pub(crate) fn open_hooks(&self) -> Vec<LifecycleHook> {
        self.read().on_open.clone()
    }

    pub(crate) fn close_hooks(&self) -> Vec<LifecycleHook> {
        self.read().on_close.clone()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.read();
        f.debug_struct("HookRegistry")
            .field("requests", &tables.requests.len())
            .field("notifications", &tables.notifications.len())
            .field("on_open", &tables.on_open.len())
            .field("on_close", &tables.on_close.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_lookup_and_replace() {
        let hooks = HookRegistry::new();
        hooks.on_request("echo", |_, params| async move { Ok(params.unwrap_or(Value::Null)) });
        hooks.on_notification("log", |_, _| async move { Ok(()) });

        assert!(matches!(
            hooks.lookup("echo", HookKind::Request),
            Some(Hook::Request(_))
        ));
        assert!(hooks.lookup("echo", HookKind::Notification).is_none());
        assert!(hooks.lookup("log", HookKind::Request).is_none());
        assert_eq!(
            hooks.lookup("log", HookKind::Notification).map(|hook| hook.kind()),
            Some(HookKind::Notification)
        );

        let replaced = hooks.register(
            "echo",
            Hook::Request(Arc::new(
                |_: Remote, _: Option<Value>| -> BoxFuture<'static, HookResult> {
                    Box::pin(async { Ok(Value::Bool(true)) })
                },
            )),
        );
        assert!(matches!(replaced, Some(Hook::Request(_))));
    }

    #[test]
    fn request_and_notification_namespaces_are_separate() {
        let hooks = HookRegistry::new();
        hooks.on_request("same", |_, _| async move { Ok(Value::Null) });
        hooks.on_notification("same", |_, _| async move { Ok(()) });

        assert_eq!(hooks.methods(HookKind::Request), vec!["same".to_string()]);
        assert_eq!(hooks.methods(HookKind::Notification), vec!["same".to_string()]);

        assert!(hooks.unregister("same", HookKind::Request));
        assert!(!hooks.unregister("same", HookKind::Request));
        assert!(hooks.lookup("same", HookKind::Notification).is_some());
    }

    #[test]
    fn methods_are_sorted() {
        let hooks = HookRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            hooks.on_request(name, |_, _| async move { Ok(Value::Null) });
        }
        assert_eq!(hooks.methods(HookKind::Request), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn lifecycle_hooks_accumulate() {
        let hooks = HookRegistry::new();
        hooks.on_open(|_| async {});
        hooks.on_open(|_| async {});
        hooks.on_close(|_| async {});

        assert_eq!(hooks.open_hooks().len(), 2);
        assert_eq!(hooks.close_hooks().len(), 1);
        assert!(format!("{hooks:?}").contains("on_open: 2"));
    }
}
