//! Ordered-fallback heuristics for locating login controls.
//!
//! The portal's markup is not contractually stable, so each rule is a
//! best-effort structural inference: rules are tried in priority order and
//! the first match wins.

use scraper::{ElementRef, Html, Selector};
use secrecy::ExposeSecret;

use crate::credentials::Credentials;

/// Name-attribute values the portal (and its login provider) have used for
/// the username input.
const USERNAME_NAMES: &[&str] = &["u", "username", "login_id"];

/// Visible-text vocabulary of affirmative controls, in the portal's
/// operating languages.
const AFFIRMATIVE_LABELS: &[&str] = &[
    "login",
    "log in",
    "sign in",
    "next",
    "agree",
    "allow",
    "ログイン",
    "次へ",
    "同意",
    "許可",
];

/// One declared input field, as scraped from the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: Option<String>,
    /// Lowercased `type` attribute; `text` when absent.
    pub kind: String,
    pub value: String,
}

impl FormField {
    fn is_hidden(&self) -> bool {
        self.kind == "hidden"
    }

    fn is_button_like(&self) -> bool {
        matches!(self.kind.as_str(), "submit" | "button" | "image" | "reset")
    }

    /// Visible in the field-before-password sense: rendered as a field the
    /// user types into.
    fn is_visible_input(&self) -> bool {
        !self.is_hidden() && !self.is_button_like() && self.kind != "checkbox"
    }
}

/// How the form gets submitted, in fallback order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submit {
    /// A submit-typed control scoped to the form; forwarded verbatim on POST.
    Control { name: Option<String>, value: String },
    /// A control located by its affirmative visible text.
    Labelled { label: String },
    /// No control found; submit the form programmatically.
    Programmatic,
}

/// A login or consent form assembled by the heuristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalForm {
    /// Declared `action`, possibly relative; `None` submits to the page URL.
    pub action: Option<String>,
    /// Lowercased declared method; defaults to `get`.
    pub method: String,
    /// Every declared input of the form, in document order.
    pub fields: Vec<FormField>,
    pub username_field: Option<String>,
    pub password_field: Option<String>,
    pub submit: Submit,
}

impl PortalForm {
    /// A form with a password field takes credentials; anything else is a
    /// consent/interstitial to click through.
    pub fn is_login(&self) -> bool {
        self.password_field.is_some()
    }
}

fn field_from(el: &ElementRef<'_>) -> FormField {
    let kind = el
        .value()
        .attr("type")
        .map(|t| t.to_ascii_lowercase())
        .unwrap_or_else(|| "text".to_string());
    FormField {
        name: el.value().attr("name").map(str::to_string),
        kind,
        value: el.value().attr("value").unwrap_or("").to_string(),
    }
}

fn ancestor_form<'a>(el: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "form")
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_lowercase()
}

fn is_affirmative(text: &str) -> bool {
    !text.is_empty() && AFFIRMATIVE_LABELS.iter().any(|label| text.contains(label))
}

/// Username detection, in priority order: a known name attribute or an
/// email/tel-typed input, else the visible input immediately preceding the
/// password field in document order.
fn find_username(fields: &[FormField], password_idx: Option<usize>) -> Option<String> {
    for field in fields {
        if field.is_hidden() || field.is_button_like() {
            continue;
        }
        let known_name = field
            .name
            .as_deref()
            .is_some_and(|n| USERNAME_NAMES.contains(&n.to_ascii_lowercase().as_str()));
        if known_name || field.kind == "email" || field.kind == "tel" {
            return field.name.clone();
        }
    }

    // Field-before-password: the generic fallback when naming conventions
    // are unknown.
    let password_idx = password_idx?;
    fields[..password_idx]
        .iter()
        .rev()
        .find(|f| f.is_visible_input() && f.kind != "password")
        .and_then(|f| f.name.clone())
}

fn find_submit_control(form: &ElementRef<'_>, document: &Html) -> Submit {
    let submit_sel = Selector::parse(
        "input[type=submit], button[type=submit], button:not([type]), input[type=image]",
    )
    .expect("static selector");
    if let Some(el) = form.select(&submit_sel).next() {
        return Submit::Control {
            name: el.value().attr("name").map(str::to_string),
            value: el.value().attr("value").unwrap_or("").to_string(),
        };
    }

    if let Some(label) = find_affirmative_label(document) {
        return Submit::Labelled { label };
    }

    Submit::Programmatic
}

fn find_affirmative_label(document: &Html) -> Option<String> {
    let clickable = Selector::parse("button, a, input[type=button], input[type=submit], div[role=button]")
        .expect("static selector");
    for el in document.select(&clickable) {
        let text = if el.value().name() == "input" {
            el.value().attr("value").unwrap_or("").trim().to_lowercase()
        } else {
            element_text(&el)
        };
        if is_affirmative(&text) {
            return Some(text);
        }
    }
    None
}

/// Scan a page for a login or consent form.
///
/// Returns `None` when the page exposes neither input fields nor a
/// submit-like control, which the state machine treats as "still loading".
pub fn scan_form(html: &str) -> Option<PortalForm> {
    let document = Html::parse_document(html);
    let input_sel = Selector::parse("input").expect("static selector");

    // 1. Password field first: it anchors the login form.
    let password_el = document
        .select(&input_sel)
        .find(|el| {
            el.value()
                .attr("type")
                .is_some_and(|t| t.eq_ignore_ascii_case("password"))
        });

    if let Some(password_el) = password_el {
        let form_el = ancestor_form(&password_el);
        let scope_fields: Vec<FormField> = match &form_el {
            Some(form) => form.select(&input_sel).map(|el| field_from(&el)).collect(),
            None => document.select(&input_sel).map(|el| field_from(&el)).collect(),
        };

        let password_idx = scope_fields.iter().position(|f| f.kind == "password");
        let password_field = password_idx.and_then(|i| scope_fields[i].name.clone());
        let username_field = find_username(&scope_fields, password_idx);

        let submit = match &form_el {
            Some(form) => find_submit_control(form, &document),
            None => find_affirmative_label(&document)
                .map(|label| Submit::Labelled { label })
                .unwrap_or(Submit::Programmatic),
        };

        return Some(PortalForm {
            action: form_el.and_then(|f| f.value().attr("action").map(str::to_string)),
            method: form_el
                .and_then(|f| f.value().attr("method").map(|m| m.to_ascii_lowercase()))
                .unwrap_or_else(|| "get".to_string()),
            fields: scope_fields,
            username_field,
            password_field,
            submit,
        });
    }

    // 2. No password field: a consent/interstitial page if some affirmative
    // control exists.
    let form_sel = Selector::parse("form").expect("static selector");
    let form_el = document.select(&form_sel).next();

    let submit = match &form_el {
        Some(form) => find_submit_control(form, &document),
        None => find_affirmative_label(&document)
            .map(|label| Submit::Labelled { label })
            .unwrap_or(Submit::Programmatic),
    };

    if matches!(submit, Submit::Programmatic) && form_el.is_none() {
        return None;
    }
    // A bare form with no controls at all is still "nothing to click".
    if matches!(submit, Submit::Programmatic)
        && form_el.is_some_and(|f| f.select(&input_sel).next().is_none())
    {
        return None;
    }

    Some(PortalForm {
        action: form_el.and_then(|f| f.value().attr("action").map(str::to_string)),
        method: form_el
            .and_then(|f| f.value().attr("method").map(|m| m.to_ascii_lowercase()))
            .unwrap_or_else(|| "get".to_string()),
        fields: form_el
            .map(|f| f.select(&input_sel).map(|el| field_from(&el)).collect())
            .unwrap_or_default(),
        username_field: None,
        password_field: None,
        submit,
    })
}

/// Build the submission payload from the form's declared fields.
///
/// Hidden fields go verbatim, the detected username/password fields carry the
/// credentials, submit-typed controls are forwarded verbatim. Field names are
/// never invented, except the last-resort `u`/`p` pair when credentials were
/// supplied but no password-typed field exists at all.
pub fn form_payload(form: &PortalForm, credentials: Option<&Credentials>) -> Vec<(String, String)> {
    let mut payload = Vec::new();

    for field in &form.fields {
        let Some(name) = &field.name else { continue };

        if Some(name) == form.username_field.as_ref() {
            if let Some(creds) = credentials {
                payload.push((name.clone(), creds.identifier.clone()));
                continue;
            }
        }
        if Some(name) == form.password_field.as_ref() {
            if let Some(creds) = credentials {
                payload.push((name.clone(), creds.secret.expose_secret().to_string()));
                continue;
            }
        }
        if field.is_button_like() && field.kind != "submit" {
            continue;
        }
        payload.push((name.clone(), field.value.clone()));
    }

    if let Some(creds) = credentials {
        if form.password_field.is_none() {
            payload.push(("u".to_string(), creds.identifier.clone()));
            payload.push(("p".to_string(), creds.secret.expose_secret().to_string()));
        }
    }

    if let Submit::Control {
        name: Some(name),
        value,
    } = &form.submit
    {
        if !payload.iter().any(|(n, _)| n == name) {
            payload.push((name.clone(), value.clone()));
        }
    }

    payload
}
