//! Integration tests for playlist sources.

use segment_fetch::{HttpClient, PlaylistError, PlaylistSource, Segment};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::{socket_skip_return, start_mock_server_or_skip};

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return socket_skip_return();
        };
        mock_server
    }};
}

#[tokio::test]
async fn test_remote_playlist_lists_segments_in_order() {
    let server = require_mock_server!();
    let body = format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXTINF:10.0,\n{0}/hls/seg0.ts\n#EXTINF:10.0,\n{0}/hls/seg1.ts\n#EXT-X-ENDLIST\n",
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/hls/index.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let source = PlaylistSource::Remote(format!("{}/hls/index.m3u8", server.uri()));
    let segments = source.list_segments(&HttpClient::new()).await.unwrap();

    assert_eq!(
        segments,
        vec![
            Segment::new(0, format!("{}/hls/seg0.ts", server.uri())),
            Segment::new(1, format!("{}/hls/seg1.ts", server.uri())),
        ]
    );
}

#[tokio::test]
async fn test_remote_playlist_http_error_is_fetch_error() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let source = PlaylistSource::Remote(format!("{}/index.m3u8", server.uri()));
    let result = source.list_segments(&HttpClient::new()).await;

    assert!(matches!(result, Err(PlaylistError::Fetch(_))));
}

#[tokio::test]
async fn test_remote_playlist_with_relative_entries_has_no_segments() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\nseg0.ts\nseg1.ts\n"))
        .mount(&server)
        .await;

    let source = PlaylistSource::Remote(format!("{}/index.m3u8", server.uri()));
    let result = source.list_segments(&HttpClient::new()).await;

    assert!(matches!(result, Err(PlaylistError::NoSegments { .. })));
}

#[tokio::test]
async fn test_discovered_playlist_is_read() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(
        temp.path().join("lesson.m3u8"),
        "#EXTM3U\nhttps://cdn.example.com/0.ts\n",
    )
    .unwrap();

    let source = PlaylistSource::discover(temp.path()).await.unwrap();
    let segments = source.list_segments(&HttpClient::new()).await.unwrap();

    assert_eq!(source, PlaylistSource::Local(temp.path().join("lesson.m3u8")));
    assert_eq!(segments, vec![Segment::new(0, "https://cdn.example.com/0.ts")]);
}
