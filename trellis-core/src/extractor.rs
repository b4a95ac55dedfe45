//! Typed handler arguments.
//!
//! Arguments of functions wrapped with [`handler`](crate::handler::handler)
//! implement [`FromContext`]. They are extracted in declaration order before
//! the function runs; the first failure answers the request with the error's
//! status (400 for malformed input) and the function is not called.
//!
//! # Available Extractors
//!
//! | Extractor         | Source                                         |
//! |-------------------|------------------------------------------------|
//! | [`State<T>`]      | shared [`AppState`](crate::AppState)           |
//! | [`Json<T>`]       | request body parsed as JSON                    |
//! | [`Params`]        | raw path parameters                            |
//! | [`Path<T>`]       | path parameters deserialized into `T`          |
//! | [`Query<T>`]      | query string deserialized into `T`             |
//! | [`Data`]          | raw request body                               |
//! | [`Extension<T>`]  | per-request value set by an earlier handler    |
//! | `Method`, `Uri`, `HeaderMap` | cloned from the request             |
//!
//! # Examples
//!
//! ```
//! use serde::Deserialize;
//! use trellis_core::prelude::*;
//!
//! #[derive(Deserialize)]
//! struct Page {
//!     page: u32,
//! }
//!
//! async fn list(Path(org): Path<String>, Query(q): Query<Page>) -> String {
//!     format!("{org} page {}", q.page)
//! }
//!
//! let router = Router::new().get("/orgs/:org/repos", handler(list));
//! # let _ = router;
//! ```

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::context::{query_pairs, Context};
use crate::error::{Error, Result};
use crate::tree;

/// Types that can be built from a request context.
pub trait FromContext: Sized {
    fn from_context(ctx: &Context) -> Result<Self>;
}

/// Shared state registered with [`Router::with_state`](crate::Router::with_state).
pub struct State<T>(pub Arc<T>);

impl<T: Send + Sync + 'static> FromContext for State<T> {
    fn from_context(ctx: &Context) -> Result<Self> {
        ctx.state::<T>().map(State).ok_or_else(|| {
            Error::handler(format!("state {} not registered", std::any::type_name::<T>()))
        })
    }
}

/// JSON request body.
pub struct Json<T>(pub T);

impl<T: DeserializeOwned> FromContext for Json<T> {
    fn from_context(ctx: &Context) -> Result<Self> {
        Ok(Json(serde_json::from_slice(ctx.body())?))
    }
}

/// All path parameters bound by the matched pattern.
pub struct Params(pub tree::Params);

impl FromContext for Params {
    fn from_context(ctx: &Context) -> Result<Self> {
        Ok(Params(ctx.params().clone()))
    }
}

/// Path parameters deserialized into `T`.
///
/// `T` may be a struct whose fields are named after the parameters, or any
/// single value when the pattern binds exactly one parameter. Values that
/// look like numbers or booleans are offered to `T` as such first.
pub struct Path<T>(pub T);

impl<T: DeserializeOwned> FromContext for Path<T> {
    fn from_context(ctx: &Context) -> Result<Self> {
        let pairs = ctx
            .params()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()));
        deserialize_pairs(pairs.collect(), true)
            .map(Path)
            .map_err(|e| Error::extractor(format!("invalid path parameters: {e}")))
    }
}

/// Query-string parameters deserialized into `T`.
pub struct Query<T>(pub T);

impl<T: DeserializeOwned> FromContext for Query<T> {
    fn from_context(ctx: &Context) -> Result<Self> {
        let pairs = ctx.uri().query().map(query_pairs).unwrap_or_default();
        deserialize_pairs(pairs, false)
            .map(Query)
            .map_err(|e| Error::extractor(format!("invalid query string: {e}")))
    }
}

/// Raw request body.
pub struct Data(pub Bytes);

impl FromContext for Data {
    fn from_context(ctx: &Context) -> Result<Self> {
        Ok(Data(ctx.body().clone()))
    }
}

/// A per-request value stored with [`Context::insert`].
pub struct Extension<T>(pub T);

impl<T: Clone + Send + Sync + 'static> FromContext for Extension<T> {
    fn from_context(ctx: &Context) -> Result<Self> {
        ctx.get::<T>().cloned().map(Extension).ok_or_else(|| {
            Error::handler(format!("extension {} not set", std::any::type_name::<T>()))
        })
    }
}

impl FromContext for Method {
    fn from_context(ctx: &Context) -> Result<Self> {
        Ok(ctx.method().clone())
    }
}

impl FromContext for Uri {
    fn from_context(ctx: &Context) -> Result<Self> {
        Ok(ctx.uri().clone())
    }
}

impl FromContext for HeaderMap {
    fn from_context(ctx: &Context) -> Result<Self> {
        Ok(ctx.headers().clone())
    }
}

impl<T: FromContext> FromContext for Option<T> {
    fn from_context(ctx: &Context) -> Result<Self> {
        Ok(T::from_context(ctx).ok())
    }
}

fn deserialize_pairs<T: DeserializeOwned>(
    pairs: Vec<(String, String)>,
    single: bool,
) -> serde_json::Result<T> {
    let typed: Map<String, Value> = pairs
        .iter()
        .map(|(k, v)| (k.clone(), scalar(v)))
        .collect();
    if let Ok(value) = serde_json::from_value(Value::Object(typed)) {
        return Ok(value);
    }

    if single && pairs.len() == 1 {
        let raw = &pairs[0].1;
        if let Ok(value) = serde_json::from_value(scalar(raw)) {
            return Ok(value);
        }
        if let Ok(value) = serde_json::from_value(Value::String(raw.clone())) {
            return Ok(value);
        }
    }

    let strings: Map<String, Value> = pairs
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    serde_json::from_value(Value::Object(strings))
}

fn scalar(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;
    use serde::Deserialize;

    fn ctx(uri: &str, body: &'static [u8]) -> Context {
        let mut request = Request::new(Bytes::from_static(body));
        *request.uri_mut() = uri.parse().unwrap();
        Context::new(request)
    }

    fn with_params(mut ctx: Context, params: &[(&str, &str)]) -> Context {
        let params = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ctx.set_route("/test", params, vec![Method::GET]);
        ctx
    }

    #[test]
    fn test_json_extractor() {
        #[derive(Deserialize)]
        struct User {
            name: String,
            age: u32,
        }

        let ctx = ctx("/", br#"{"name":"ada","age":36}"#);
        let Json(user) = Json::<User>::from_context(&ctx).unwrap();
        assert_eq!(user.name, "ada");
        assert_eq!(user.age, 36);

        let bad = self::ctx("/", b"nope");
        let err = Json::<User>::from_context(&bad).err().unwrap();
        assert_eq!(err.status_code(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_path_struct_and_single() {
        #[derive(Deserialize)]
        struct Repo {
            org: String,
            id: u64,
        }

        let ctx = with_params(ctx("/", b""), &[("org", "acme"), ("id", "7")]);
        let Path(repo) = Path::<Repo>::from_context(&ctx).unwrap();
        assert_eq!(repo.org, "acme");
        assert_eq!(repo.id, 7);

        let ctx = with_params(self::ctx("/", b""), &[("id", "42")]);
        let Path(id) = Path::<u32>::from_context(&ctx).unwrap();
        assert_eq!(id, 42);
        let Path(id) = Path::<String>::from_context(&ctx).unwrap();
        assert_eq!(id, "42");
    }

    #[test]
    fn test_path_all_strings_fallback() {
        #[derive(Deserialize)]
        struct Named {
            name: String,
        }

        let ctx = with_params(ctx("/", b""), &[("name", "1234")]);
        let Path(named) = Path::<Named>::from_context(&ctx).unwrap();
        assert_eq!(named.name, "1234");
    }

    #[test]
    fn test_query_extractor() {
        #[derive(Deserialize)]
        struct Search {
            q: String,
            limit: Option<u32>,
        }

        let ctx = ctx("/search?q=rust+trie&limit=10", b"");
        let Query(search) = Query::<Search>::from_context(&ctx).unwrap();
        assert_eq!(search.q, "rust trie");
        assert_eq!(search.limit, Some(10));

        let ctx = self::ctx("/search", b"");
        assert!(Query::<Search>::from_context(&ctx).is_err());
    }

    #[test]
    fn test_state_and_extension() {
        let mut ctx = ctx("/", b"");
        assert!(State::<String>::from_context(&ctx).is_err());

        ctx.insert(7_u8);
        let Extension(value) = Extension::<u8>::from_context(&ctx).unwrap();
        assert_eq!(value, 7);

        let missing = Option::<Extension<u16>>::from_context(&ctx).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_request_parts() {
        let ctx = ctx("/a?b=c", b"payload");
        assert_eq!(Method::from_context(&ctx).unwrap(), Method::GET);
        assert_eq!(Uri::from_context(&ctx).unwrap().path(), "/a");
        let Data(body) = Data::from_context(&ctx).unwrap();
        assert_eq!(&body[..], b"payload");
    }
}
