use reqwest::StatusCode;
use serde_json::json;
use selsync_core::{Credentials, DavClient, DavError, LSCOL_PROPERTIES};
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LISTING: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/remote.php/webdav/Photos/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
        <d:quota-used-bytes>2048</d:quota-used-bytes>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/webdav/Photos/2020/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
        <d:quota-used-bytes>1024</d:quota-used-bytes>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/webdav/Photos/2021/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
        <d:quota-used-bytes>1024</d:quota-used-bytes>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

fn client(server: &MockServer) -> DavClient {
    DavClient::with_base_url(&server.uri(), Some(Credentials::http("alice", "secret"))).unwrap()
}

#[tokio::test]
async fn list_subfolders_sends_depth_one_propfind() {
    let server = MockServer::start().await;

    Mock::given(method("PROPFIND"))
        .and(path("/remote.php/webdav/Photos/"))
        .and(header("depth", "1"))
        .and(header("authorization", "Basic YWxpY2U6c2VjcmV0"))
        .and(body_string_contains("quota-used-bytes"))
        .respond_with(ResponseTemplate::new(207).set_body_string(LISTING))
        .mount(&server)
        .await;

    let listing = client(&server)
        .list_subfolders("Photos/", LSCOL_PROPERTIES)
        .await
        .unwrap();

    assert_eq!(listing.entries.len(), 3);
    assert_eq!(listing.entries[0], "/remote.php/webdav/Photos/");
    assert_eq!(listing.entries[2], "/remote.php/webdav/Photos/2021/");
    assert_eq!(listing.sizes["/remote.php/webdav/Photos/2020/"], 1024);
}

#[tokio::test]
async fn list_subfolders_reports_missing_directory() {
    let server = MockServer::start().await;

    Mock::given(method("PROPFIND"))
        .and(path("/remote.php/webdav/Gone/"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let err = client(&server)
        .list_subfolders("Gone/", LSCOL_PROPERTIES)
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn server_errors_are_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("PROPFIND"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client(&server)
        .list_subfolders("/", LSCOL_PROPERTIES)
        .await
        .unwrap_err();

    match &err {
        DavError::Api { status, .. } => assert_eq!(*status, StatusCode::SERVICE_UNAVAILABLE),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn fetch_status_parses_version() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "installed": true,
            "version": "8.1.0.8",
            "versionstring": "8.1.0",
            "edition": ""
        })))
        .mount(&server)
        .await;

    let status = client(&server).fetch_status().await.unwrap();

    assert!(status.installed);
    assert_eq!(status.version, "8.1.0.8");
    assert_eq!(status.versionstring, "8.1.0");
}

#[tokio::test]
async fn refresh_account_info_caches_capabilities_and_version() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "installed": true,
            "version": "8.2.0.1"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ocs/v1.php/cloud/capabilities"))
        .and(query_param("format", "json"))
        .and(header("ocs-apirequest", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ocs": {
                "meta": { "status": "ok" },
                "data": {
                    "capabilities": {
                        "files": { "bigfilechunking": true }
                    }
                }
            }
        })))
        .mount(&server)
        .await;

    let mut account = selsync_core::Account::new(Url::parse(&server.uri()).unwrap());
    account.set_credentials(Credentials::http("alice", "secret"));
    let client = DavClient::from_account(&account).unwrap();
    client.refresh_account_info(&mut account).await.unwrap();

    assert_eq!(account.server_version(), "8.2.0.1");
    assert_eq!(
        account.capabilities()["files"]["bigfilechunking"],
        json!(true)
    );
}

#[tokio::test]
async fn capabilities_without_payload_are_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ocs/v1.php/cloud/capabilities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ocs": {} })))
        .mount(&server)
        .await;

    let err = client(&server).fetch_capabilities().await.unwrap_err();

    assert!(matches!(err, DavError::MissingCapabilities));
}
