mod support;

use rakumon::outcome::{Outcome, UsageReading};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Full round trip: unauthenticated dashboard request bounces to the login
/// page, the scraped form is posted back with cookies and hidden fields
/// intact, and the follow-up redirect lands on the dashboard.
#[tokio::test]
async fn login_roundtrip_reaches_the_dashboard() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/dashboard"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/login/signin"))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/login/signin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "sid=abc; Path=/")
                .set_body_raw(support::LOGIN_HTML, "text/html"),
        )
        .mount(&server)
        .await;

    // The submission must replay the session cookie, carry the hidden token
    // verbatim, and fill the detected username/password fields.
    Mock::given(method("POST"))
        .and(path("/auth"))
        .and(header("cookie", "sid=abc"))
        .and(body_string_contains("token=tok-1"))
        .and(body_string_contains("username=alice%40example.com"))
        .and(body_string_contains("passwd=hunter2"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/dashboard"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/dashboard"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(support::DASHBOARD_HTML, "text/html"),
        )
        .mount(&server)
        .await;

    let report = support::fetch_direct(support::portal_config(&server.uri())).await;
    assert_eq!(report.outcome, Outcome::Success(UsageReading::new(19.5)));
}

/// Rejected credentials bounce back to the login page; the fetch stops with
/// `LoginRequired` instead of resubmitting forever.
#[tokio::test]
async fn rejected_credentials_stop_with_login_required() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/dashboard"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/login/signin"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/login/signin"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(support::LOGIN_HTML, "text/html"))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", "/login/signin?error=1"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let report = support::fetch_direct(support::portal_config(&server.uri())).await;
    assert_eq!(report.outcome, Outcome::LoginRequired);
}

/// Consent interstitial between login and dashboard: no password field, one
/// affirmative control, submitted without credentials.
#[tokio::test]
async fn consent_interstitial_is_clicked_through() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/dashboard"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/login/consent"))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/login/consent"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<form action="/login/consent" method="post">
                   <input type="hidden" name="scope" value="usage">
                   <button type="submit" name="approve" value="1">同意する</button>
               </form>"#,
            "text/html",
        ))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/login/consent"))
        .and(body_string_contains("scope=usage"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/dashboard"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/dashboard"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(support::DASHBOARD_HTML, "text/html"),
        )
        .mount(&server)
        .await;

    let report = support::fetch_direct(support::portal_config(&server.uri())).await;
    assert_eq!(report.outcome, Outcome::Success(UsageReading::new(19.5)));
}
