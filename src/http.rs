// Copyright 2025 Callflow Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Transport binding: axum adapter.
//!
//! The engine itself is transport-agnostic; this module binds a
//! [`CallRouter`] plus a set of path-registered handlers to an
//! `axum::Router`. The PBX sends GET turns in the query string and POST
//! turns as an urlencoded body; both are decoded into the same flat pair
//! list so duplicated keys keep their last occurrence.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::RawQuery;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use tower_http::trace::TraceLayer;
use tracing::info;
use url::form_urlencoded;

use crate::dispatcher::{call_handler, CallHandler, CallRouter};
use crate::error::CallResult;
use crate::session::CallSession;
use crate::turn::{Turn, TurnReply};

/// A [`CallRouter`] bound to handler paths, convertible into an axum app.
pub struct IvrService {
    router: CallRouter,
    routes: Vec<(String, CallHandler)>,
}

impl IvrService {
    pub fn new(router: CallRouter) -> Self {
        IvrService {
            router,
            routes: Vec::new(),
        }
    }

    pub fn router(&self) -> &CallRouter {
        &self.router
    }

    /// Register a call handler for a path.
    pub fn handle<F, Fut>(mut self, path: impl Into<String>, f: F) -> Self
    where
        F: Fn(std::sync::Arc<CallSession>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = CallResult<()>> + Send + 'static,
    {
        self.routes.push((path.into(), call_handler(f)));
        self
    }

    pub fn into_router(self) -> axum::Router {
        let mut app = axum::Router::new();
        for (path, handler) in self.routes {
            let router = self.router.clone();
            let route = move |method: Method, RawQuery(query): RawQuery, body: Bytes| {
                let router = router.clone();
                let handler = handler.clone();
                async move { serve_turn(router, handler, method, query, body).await }
            };
            app = app.route(&path, get(route.clone()).post(route));
        }
        app.layer(TraceLayer::new_for_http())
    }

    /// Bind and serve. Convenience for binaries that embed nothing else.
    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "ivr service listening");
        axum::serve(listener, self.into_router()).await?;
        Ok(())
    }
}

async fn serve_turn(
    router: CallRouter,
    handler: CallHandler,
    method: Method,
    query: Option<String>,
    body: Bytes,
) -> Response {
    let pairs: Vec<(String, String)> = if method == Method::POST {
        form_urlencoded::parse(&body).into_owned().collect()
    } else {
        form_urlencoded::parse(query.unwrap_or_default().as_bytes())
            .into_owned()
            .collect()
    };
    let turn = Turn::from_pairs(pairs);
    into_response(router.handle_turn(turn, handler).await)
}

fn into_response(reply: TurnReply) -> Response {
    match reply {
        TurnReply::Module(module) => Json(module).into_response(),
        TurnReply::Ack { message: Some(msg) } => {
            Json(serde_json::json!({ "message": msg })).into_response()
        }
        TurnReply::Ack { message: None } => Json(serde_json::json!({})).into_response(),
        TurnReply::Error(msg) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": msg })),
        )
            .into_response(),
    }
}
