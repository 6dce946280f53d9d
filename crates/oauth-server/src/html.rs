//! Inline HTML templates for the approval pages

use crate::config::ScopeConfig;
use crate::oauth::device::UserCode;
use crate::storage::Client;

/// Steps of the device verification page
pub enum DeviceStep<'a> {
    /// Ask for a user code
    Code,
    /// Unknown or expired code
    Invalid,
    /// Ask the user to approve a request
    Pending {
        code: &'a UserCode,
        client: &'a Client,
        scopes: &'a [&'a ScopeConfig],
    },
    Granted,
    Denied,
}

/// Consent page for the authorization code flow.
///
/// The form posts to the current URL so the request parameters travel along.
pub fn authorize_page(
    client: &Client,
    username: &str,
    redirect_origin: &str,
    scopes: &[&ScopeConfig],
) -> String {
    let body = format!(
        r#"{}
        <h1>Authorize {}</h1>
        <p>Signed in as <strong>{}</strong>.</p>
        <p><a href="{}" rel="noopener noreferrer">{}</a> would like to access your account:</p>
        {}
        <p>You will be redirected to <code>{}</code>.</p>

        <form method="post">
            <div class="actions">
                <button type="submit" name="granted" value="0" class="secondary">Deny</button>
                <button type="submit" name="granted" value="1">Authorize</button>
            </div>
        </form>"#,
        client_logo(client),
        html_escape(&client.name),
        html_escape(username),
        html_escape(&client.website),
        html_escape(&client.name),
        scope_list(scopes),
        html_escape(redirect_origin),
    );

    layout(&format!("Authorize {}", client.name), &body)
}

/// Device verification page. Its forms submit to `page_url`.
pub fn device_page(step: DeviceStep<'_>, username: &str, page_url: &str) -> String {
    let body = match step {
        DeviceStep::Code => code_form(username, page_url, ""),
        DeviceStep::Invalid => code_form(
            username,
            page_url,
            r#"<div class="status error">This code has expired or is not valid.</div>"#,
        ),
        DeviceStep::Pending {
            code,
            client,
            scopes,
        } => format!(
            r#"{}
        <h1>Authorize {}</h1>
        <p>Signed in as <strong>{}</strong>.</p>
        <p>Make sure your device shows the code <code>{}</code>.</p>
        <p><a href="{}" rel="noopener noreferrer">{}</a> would like to access your account:</p>
        {}
        <form method="post" action="{}">
            <input type="hidden" name="user_code" value="{}">
            <div class="actions">
                <button type="submit" name="granted" value="0" class="secondary">Deny</button>
                <button type="submit" name="granted" value="1">Authorize</button>
            </div>
        </form>"#,
            client_logo(client),
            html_escape(&client.name),
            html_escape(username),
            html_escape(code.as_str()),
            html_escape(&client.website),
            html_escape(&client.name),
            scope_list(scopes),
            html_escape(page_url),
            html_escape(code.as_str()),
        ),
        DeviceStep::Granted => r#"<h1>Device connected</h1>
        <div class="status success">Access granted. You can return to your device.</div>"#
            .to_string(),
        DeviceStep::Denied => r#"<h1>Access denied</h1>
        <div class="status error">You denied access to this device.</div>"#
            .to_string(),
    };

    layout("Connect a device", &body)
}

fn code_form(username: &str, page_url: &str, error: &str) -> String {
    format!(
        r#"<h1>Connect a device</h1>
        <p>Signed in as <strong>{}</strong>. Enter the code shown on your device.</p>
        {}
        <form method="get" action="{}">
            <div class="field">
                <label for="user_code">Code</label>
                <input type="text" id="user_code" name="user_code" required autocomplete="off"
                    autocapitalize="characters" placeholder="XXXX-XXXX">
            </div>
            <button type="submit">Continue</button>
        </form>"#,
        html_escape(username),
        error,
        html_escape(page_url)
    )
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{}</title>
    <style>{}</style>
</head>
<body>
    <div class="container">
        {}
    </div>
</body>
</html>"#,
        html_escape(title),
        CSS_STYLES,
        body
    )
}

fn client_logo(client: &Client) -> String {
    if client.logo.is_empty() {
        return String::new();
    }
    format!(
        r#"<img class="logo" src="{}" alt="" width="48" height="48">"#,
        html_escape(&client.logo)
    )
}

fn scope_list(scopes: &[&ScopeConfig]) -> String {
    let items: String = scopes
        .iter()
        .map(|s| {
            format!(
                "<li><strong>{}</strong> <span>{}</span></li>",
                html_escape(&s.name),
                html_escape(&s.description)
            )
        })
        .collect();
    format!(r#"<ul class="scopes">{}</ul>"#, items)
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

const CSS_STYLES: &str = r#"
* {
    box-sizing: border-box;
}
body {
    font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
    background: #1a1a2e;
    color: #eee;
    margin: 0;
    padding: 20px;
    min-height: 100vh;
    display: flex;
    align-items: center;
    justify-content: center;
}
.container {
    background: #16213e;
    padding: 40px;
    border-radius: 12px;
    max-width: 440px;
    width: 100%;
    box-shadow: 0 4px 20px rgba(0,0,0,0.3);
}
h1 {
    margin: 0 0 10px 0;
    color: #fff;
    font-size: 24px;
}
p {
    color: #aaa;
    margin: 0 0 20px 0;
    line-height: 1.5;
}
a {
    color: #a5b4fc;
}
.logo {
    display: block;
    margin-bottom: 16px;
    border-radius: 8px;
}
.field {
    margin-bottom: 20px;
}
label {
    display: block;
    margin-bottom: 8px;
    color: #ddd;
    font-size: 14px;
}
input {
    width: 100%;
    padding: 12px;
    border: 1px solid #333;
    border-radius: 6px;
    background: #0f0f23;
    color: #fff;
    font-size: 16px;
    text-transform: uppercase;
    letter-spacing: 2px;
}
input:focus {
    outline: none;
    border-color: #4f46e5;
}
.scopes {
    list-style: none;
    padding: 0;
    margin: 0 0 20px 0;
}
.scopes li {
    padding: 10px 12px;
    margin-bottom: 8px;
    background: #0f0f23;
    border-radius: 6px;
}
.scopes span {
    display: block;
    color: #aaa;
    font-size: 14px;
}
.actions {
    display: flex;
    gap: 12px;
}
button {
    display: block;
    width: 100%;
    padding: 14px;
    background: #4f46e5;
    color: #fff;
    border: none;
    border-radius: 6px;
    font-size: 16px;
    cursor: pointer;
    text-align: center;
}
button:hover {
    background: #4338ca;
}
button.secondary {
    background: #333;
}
.status {
    margin-bottom: 20px;
    padding: 12px;
    border-radius: 6px;
    font-size: 14px;
}
.status.error {
    background: #7f1d1d;
    color: #fca5a5;
}
.status.success {
    background: #14532d;
    color: #86efac;
}
code {
    background: #0f0f23;
    padding: 2px 6px;
    border-radius: 4px;
    font-size: 14px;
}
"#;
