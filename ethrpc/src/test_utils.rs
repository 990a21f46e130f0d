// Copyright (C) 2025, 2026 Unlockerd Developers (see AUTHORS)
//
// This file is part of Unlockerd
//
// Unlockerd is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Unlockerd is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// Unlockerd. If not, see <https://www.gnu.org/licenses/>.

//! Wiremock helpers for tests exercising the RPC client.

use crate::EthRpcConfig;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub async fn setup_mock_eth_rpc() -> (MockServer, EthRpcConfig) {
    let mock_server = MockServer::start().await;

    let config = EthRpcConfig {
        url: mock_server.uri(),
        timeout_secs: 5,
    };

    (mock_server, config)
}

/// Mounts a mock answering `api_method` with `result`, regardless of params
pub async fn mock_method(mock_server: &MockServer, api_method: &str, result: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(serde_json::json!({
            "jsonrpc": "2.0",
            "method": api_method,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "result": result,
            "id": 0,
        })))
        .mount(mock_server)
        .await;
}

/// Mounts a mock answering `api_method` with a JSON-RPC error
pub async fn mock_error(mock_server: &MockServer, api_method: &str, code: i64, message: &str) {
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(serde_json::json!({
            "jsonrpc": "2.0",
            "method": api_method,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "jsonrpc": "2.0",
            "result": serde_json::Value::Null,
            "error": { "code": code, "message": message },
            "id": 0,
        })))
        .mount(mock_server)
        .await;
}
