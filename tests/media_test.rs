use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use zip::write::SimpleFileOptions;

use mirror_jukebox::archive::ArchiveMember;
use mirror_jukebox::cache::CacheDir;
use mirror_jukebox::config::TranscoderConfig;
use mirror_jukebox::fetcher::{BoundedFetcher, FetchTimeouts};
use mirror_jukebox::media::{MediaError, MediaPipeline, Transcoder};
use mirror_jukebox::models::{Track, TrackSource};

struct MockMirror {
    files: HashMap<String, Vec<u8>>,
    requests: AtomicUsize,
}

async fn mirror_handler(State(mirror): State<Arc<MockMirror>>, uri: Uri) -> Response {
    mirror.requests.fetch_add(1, Ordering::SeqCst);
    match mirror.files.get(uri.path()) {
        Some(body) => (StatusCode::OK, body.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}

async fn start_mirror(files: HashMap<String, Vec<u8>>) -> (String, Arc<MockMirror>) {
    let mirror = Arc::new(MockMirror {
        files,
        requests: AtomicUsize::new(0),
    });
    let app = Router::new()
        .fallback(mirror_handler)
        .with_state(mirror.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://{}", addr), mirror)
}

fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in files {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn sample_files() -> HashMap<String, Vec<u8>> {
    let mut files = HashMap::new();
    files.insert("/music/tune.mp3".to_string(), b"ID3 mp3 bytes".to_vec());
    files.insert("/music/space_debris.mod".to_string(), b"M.K. module bytes".to_vec());
    files.insert("/music/sid/commando.sid".to_string(), b"PSID".to_vec());
    files.insert(
        "/music/pack.zip".to_string(),
        build_zip(&[("disk/tune.mp3", b"zipped mp3"), ("cover.png", b"\x89PNG art")]),
    );
    files.insert("/music/cover.jpg".to_string(), vec![0xff, 0xd8, 0xff, 0xe0, 1, 2, 3]);
    files
}

fn direct_track(id: i64, base: &str, path: &str, format: &str) -> Track {
    let filename = path.rsplit('/').next().unwrap().to_string();
    Track {
        id,
        collection_id: 1,
        title: filename.clone(),
        filename,
        remote_url: format!("{}{}", base, path),
        format: format.to_string(),
        source: TrackSource::Direct,
        file_size: None,
        upvoted: false,
        play_count: 0,
    }
}

fn archived_track(id: i64, base: &str, archive_path: &str, entry: &str, format: &str) -> Track {
    let member = ArchiveMember::new(&format!("{}{}", base, archive_path), entry);
    Track {
        id,
        collection_id: 1,
        filename: member.leaf_name().to_string(),
        title: member.leaf_name().to_string(),
        remote_url: member.locator(),
        format: format.to_string(),
        source: TrackSource::Archived(member),
        file_size: None,
        upvoted: false,
        play_count: 0,
    }
}

/// Stand-in transcoder: writes an Ogg signature to its last argument
#[cfg(unix)]
fn fake_transcoder(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("fake-ffmpeg.sh");
    std::fs::write(
        &script,
        "#!/bin/sh\nfor last; do :; done\nprintf 'OggS' > \"$last\"\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

fn pipeline(temp: &Path, program: PathBuf, download_budget: u64) -> MediaPipeline {
    pipeline_with_timeout(temp, program, download_budget, 10)
}

fn pipeline_with_timeout(
    temp: &Path,
    program: PathBuf,
    download_budget: u64,
    timeout_secs: u64,
) -> MediaPipeline {
    let fetcher = BoundedFetcher::new(2, FetchTimeouts::default()).unwrap();
    let transcoder = Transcoder::new(&TranscoderConfig {
        program,
        timeout_secs,
        ..TranscoderConfig::default()
    });
    MediaPipeline::new(
        fetcher,
        CacheDir::new(temp.join("downloads"), download_budget),
        CacheDir::new(temp.join("converted"), 1024 * 1024),
        temp.join("art"),
        transcoder,
    )
}

fn dir_entries(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn test_unsupported_format_touches_nothing() {
    let (base, mirror) = start_mirror(sample_files()).await;
    let temp = tempfile::tempdir().unwrap();
    let media = pipeline(temp.path(), PathBuf::from("ffmpeg"), 1024 * 1024);

    let track = direct_track(1, &base, "/music/sid/commando.sid", "sid");
    let result = media.prepare_track(&track).await;
    assert!(matches!(result, Err(MediaError::Unsupported(ref f)) if f == "sid"));
    assert!(matches!(
        media.fetch_original(&track).await,
        Err(MediaError::Unsupported(_))
    ));

    assert_eq!(mirror.requests.load(Ordering::SeqCst), 0);
    assert!(dir_entries(&temp.path().join("downloads")).is_empty());
    assert!(dir_entries(&temp.path().join("converted")).is_empty());
}

#[tokio::test]
async fn test_direct_stream_is_downloaded_once() {
    let (base, mirror) = start_mirror(sample_files()).await;
    let temp = tempfile::tempdir().unwrap();
    let media = pipeline(temp.path(), PathBuf::from("ffmpeg"), 1024 * 1024);

    let track = direct_track(7, &base, "/music/tune.mp3", "mp3");
    let path = media.prepare_track(&track).await.unwrap();
    assert_eq!(path, temp.path().join("downloads").join("7_tune.mp3"));
    assert_eq!(std::fs::read(&path).unwrap(), b"ID3 mp3 bytes");
    assert_eq!(mirror.requests.load(Ordering::SeqCst), 1);

    let again = media.prepare_track(&track).await.unwrap();
    assert_eq!(again, path);
    assert_eq!(mirror.requests.load(Ordering::SeqCst), 1);

    // Only the finished file remains, no partial download
    assert_eq!(dir_entries(&temp.path().join("downloads")), vec!["7_tune.mp3"]);
}

#[tokio::test]
async fn test_missing_remote_file_is_unavailable() {
    let (base, _mirror) = start_mirror(sample_files()).await;
    let temp = tempfile::tempdir().unwrap();
    let media = pipeline(temp.path(), PathBuf::from("ffmpeg"), 1024 * 1024);

    let track = direct_track(3, &base, "/music/gone.mp3", "mp3");
    let result = media.prepare_track(&track).await;
    assert!(matches!(result, Err(MediaError::Unavailable(_))));
    assert!(dir_entries(&temp.path().join("downloads")).is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_tracker_module_is_converted_and_reused() {
    let (base, mirror) = start_mirror(sample_files()).await;
    let temp = tempfile::tempdir().unwrap();
    let program = fake_transcoder(temp.path());
    let media = pipeline(temp.path(), program, 1024 * 1024);

    let track = direct_track(12, &base, "/music/space_debris.mod", "mod");
    let path = media.prepare_track(&track).await.unwrap();
    assert_eq!(path, temp.path().join("converted").join("12.ogg"));
    assert_eq!(std::fs::read(&path).unwrap(), b"OggS");
    assert_eq!(dir_entries(&temp.path().join("converted")), vec!["12.ogg"]);

    let again = media.prepare_track(&track).await.unwrap();
    assert_eq!(again, path);
    assert_eq!(mirror.requests.load(Ordering::SeqCst), 1);

    // The untouched source stays available for download
    let original = media.fetch_original(&track).await.unwrap();
    assert_eq!(std::fs::read(original).unwrap(), b"M.K. module bytes");
    assert_eq!(mirror.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_conversion_leaves_no_output() {
    let (base, _mirror) = start_mirror(sample_files()).await;
    let temp = tempfile::tempdir().unwrap();
    let media = pipeline(temp.path(), PathBuf::from("false"), 1024 * 1024);

    let track = direct_track(12, &base, "/music/space_debris.mod", "mod");
    let result = media.prepare_track(&track).await;
    assert!(matches!(result, Err(MediaError::Transcode(_))));
    assert!(dir_entries(&temp.path().join("converted")).is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_hung_transcoder_times_out() {
    use std::os::unix::fs::PermissionsExt;

    let (base, _mirror) = start_mirror(sample_files()).await;
    let temp = tempfile::tempdir().unwrap();
    let script = temp.path().join("slow-ffmpeg.sh");
    std::fs::write(
        &script,
        "#!/bin/sh\nfor last; do :; done\nprintf 'OggS' > \"$last\"\nsleep 5\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    let media = pipeline_with_timeout(temp.path(), script, 1024 * 1024, 1);

    let started = std::time::Instant::now();
    let track = direct_track(13, &base, "/music/space_debris.mod", "mod");
    let result = media.prepare_track(&track).await;
    assert!(matches!(result, Err(MediaError::Transcode(_))));
    assert!(started.elapsed() < Duration::from_secs(4));
    // The half-written output is discarded
    assert!(dir_entries(&temp.path().join("converted")).is_empty());
}

#[tokio::test]
async fn test_missing_transcoder_is_a_transcode_error() {
    let (base, _mirror) = start_mirror(sample_files()).await;
    let temp = tempfile::tempdir().unwrap();
    let media = pipeline(
        temp.path(),
        temp.path().join("no-such-transcoder"),
        1024 * 1024,
    );

    let track = direct_track(5, &base, "/music/space_debris.mod", "mod");
    let result = media.prepare_track(&track).await;
    assert!(matches!(result, Err(MediaError::Transcode(_))));
}

#[tokio::test]
async fn test_archived_track_is_extracted() {
    let (base, _mirror) = start_mirror(sample_files()).await;
    let temp = tempfile::tempdir().unwrap();
    let media = pipeline(temp.path(), PathBuf::from("ffmpeg"), 1024 * 1024);

    let track = archived_track(21, &base, "/music/pack.zip", "disk/tune.mp3", "mp3");
    let path = media.prepare_track(&track).await.unwrap();
    assert_eq!(path, temp.path().join("downloads").join("21_tune.mp3"));
    assert_eq!(std::fs::read(&path).unwrap(), b"zipped mp3");

    let missing = archived_track(22, &base, "/music/pack.zip", "disk/absent.mp3", "mp3");
    assert!(matches!(
        media.prepare_track(&missing).await,
        Err(MediaError::Unavailable(_))
    ));
    assert!(!temp.path().join("downloads").join("22_absent.mp3").exists());
}

#[tokio::test]
async fn test_download_evicts_old_files_over_budget() {
    let (base, _mirror) = start_mirror(sample_files()).await;
    let temp = tempfile::tempdir().unwrap();
    let downloads = temp.path().join("downloads");
    std::fs::create_dir_all(&downloads).unwrap();
    let stale = downloads.join("99_stale.mod");
    std::fs::write(&stale, vec![0u8; 4096]).unwrap();

    let media = pipeline(temp.path(), PathBuf::from("ffmpeg"), 1024);
    let track = direct_track(7, &base, "/music/tune.mp3", "mp3");
    media.prepare_track(&track).await.unwrap();

    assert!(!stale.exists());
    assert_eq!(dir_entries(&downloads), vec!["7_tune.mp3"]);
}

#[tokio::test]
async fn test_art_is_cached_per_collection() {
    let (base, mirror) = start_mirror(sample_files()).await;
    let temp = tempfile::tempdir().unwrap();
    let media = pipeline(temp.path(), PathBuf::from("ffmpeg"), 1024 * 1024);

    let (data, content_type) = media
        .fetch_art(4, &format!("{}/music/cover.jpg", base))
        .await
        .unwrap();
    assert_eq!(content_type, "image/jpeg");
    assert_eq!(data[..3], [0xff, 0xd8, 0xff]);
    assert!(temp.path().join("art").join("4.img").exists());

    let requests = mirror.requests.load(Ordering::SeqCst);
    let (cached, _) = media
        .fetch_art(4, &format!("{}/music/cover.jpg", base))
        .await
        .unwrap();
    assert_eq!(cached, data);
    assert_eq!(mirror.requests.load(Ordering::SeqCst), requests);

    let (zipped, content_type) = media
        .fetch_art(5, &format!("zip:{}/music/pack.zip!/cover.png", base))
        .await
        .unwrap();
    assert_eq!(content_type, "image/png");
    assert_eq!(zipped, b"\x89PNG art");

    let missing = media
        .fetch_art(6, &format!("{}/music/missing.jpg", base))
        .await;
    assert!(matches!(missing, Err(MediaError::Unavailable(_))));
    assert!(!temp.path().join("art").join("6.img").exists());
}
