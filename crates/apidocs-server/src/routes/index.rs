//! UI entry page behind the access gate.

use axum::{
    Form, Router,
    extract::{State, rejection::FormRejection},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::cookie::SignedCookieJar;
use serde::Deserialize;

use crate::auth::Session;
use crate::state::AppState;

/// Login page shown while the session lacks the gate marker.
pub const LOGIN_FORM: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>API Documentation</title></head>
<body>
<form method="post">
  <label for="password">Access token</label>
  <input id="password" name="password" type="password" autofocus>
  <button type="submit">Enter</button>
</form>
</body>
</html>
"#;

/// Form posted by the login page.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub password: String,
}

/// GET {base} - Redirect to the index page.
async fn redirect_to_index(State(state): State<AppState>) -> impl IntoResponse {
    let location = format!("{}/index", state.config().base_path());
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)])
}

/// GET {base}/index - UI page, or the login form.
async fn show_index(State(state): State<AppState>, jar: SignedCookieJar) -> Html<String> {
    let session = Session::from_jar(&jar);
    if state.gate().admits(&session) {
        render_index(&state)
    } else {
        Html(LOGIN_FORM.to_string())
    }
}

/// POST {base}/index - Check the submitted token.
///
/// A body that is not a form counts as an empty token.
async fn submit_login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    let password = match form {
        Ok(Form(form)) => form.password,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Login body is not a form");
            String::new()
        }
    };
    let gate = state.gate();
    let mut session = Session::from_jar(&jar);

    if gate.verify(&password) {
        tracing::info!("Access token accepted");
        session.insert(gate.marker());
        let jar = session.save(jar);
        return (jar, render_index(&state)).into_response();
    }

    if gate.admits(&session) {
        return render_index(&state).into_response();
    }

    tracing::info!("Access token rejected");
    Html(LOGIN_FORM).into_response()
}

fn render_index(state: &AppState) -> Html<String> {
    let config = state.config();
    let gateway = config.gateway_origin.as_deref().unwrap_or_default();
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>API Documentation</title></head>
<body>
<div id="swagger-ui" data-base-path="{}" data-gateway-origin="{}" data-services="{}/static/services.json"></div>
</body>
</html>
"#,
        escape_attr(&config.base_path()),
        escape_attr(gateway),
        escape_attr(&config.base_path()),
    ))
}

fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Build index routes under `base`.
pub fn routes(base: &str) -> Router<AppState> {
    Router::new()
        .route(base, get(redirect_to_index))
        .route(&format!("{base}/index"), get(show_index).post(submit_login))
}
