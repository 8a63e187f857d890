use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use tiny_http::{Header, Method, Response, Server, StatusCode};

use catalog_sync::app::{App, RecordOutcome, SyncOptions};
use catalog_sync::client::CatalogHttpClient;
use catalog_sync::domain::DatasetId;
use catalog_sync::ledger::Ledger;
use catalog_sync::output::JsonOutput;
use catalog_sync::store::Store;

const HOSPITALS_CSV: &str = "Facility ID,Facility Name,Hospital overall rating\n\
                             010001,\"SOUTHEAST HEALTH, INC\",3\n\
                             010005,MARSHALL MEDICAL CENTERS,4\n";

struct CatalogServer {
    base: String,
    csv_requests: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl CatalogServer {
    fn shutdown(self) {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.join().unwrap();
    }
}

fn spawn_catalog_server() -> CatalogServer {
    let server = Server::http("127.0.0.1:0").expect("http server");
    let base = format!("http://{}", server.server_addr());
    let csv_requests = Arc::new(AtomicUsize::new(0));
    let csv_requests_clone = Arc::clone(&csv_requests);
    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = Arc::clone(&stop);
    let handle = thread::spawn(move || loop {
        let req = match server.recv_timeout(Duration::from_millis(100)) {
            Ok(Some(req)) => req,
            Ok(None) if stop_clone.load(Ordering::Relaxed) => break,
            Ok(None) => continue,
            Err(_) => break,
        };
        if req.method() != &Method::Get {
            let _ = req.respond(Response::empty(StatusCode(405)));
            continue;
        }
        if req.url() == "/files/hospitals.csv" {
            csv_requests_clone.fetch_add(1, Ordering::Relaxed);
            let _ = req.respond(Response::from_string(HOSPITALS_CSV).with_header(
                Header::from_bytes("Content-Type", "text/csv").expect("content type header"),
            ));
        } else {
            let response = Response::from_string("not found").with_status_code(StatusCode(404));
            let _ = req.respond(response);
        }
    });
    CatalogServer {
        base,
        csv_requests,
        stop,
        handle,
    }
}

fn write_manifest(root: &Utf8PathBuf, base: &str) -> Utf8PathBuf {
    let manifest = format!(
        r#"[
            {{"landingPage": "https://data.example.gov/provider-data/dataset/xubh-q36u",
              "modified": "2024-05-08",
              "distribution": [{{"downloadURL": "{base}/files/hospitals.csv"}}],
              "theme": ["Hospitals"]}},
            {{"landingPage": "https://data.example.gov/provider-data/dataset/gone-0404",
              "modified": "2024-05-08",
              "distribution": [{{"downloadURL": "{base}/files/missing.csv"}}],
              "theme": ["Hospitals"]}},
            {{"landingPage": "https://data.example.gov/provider-data/dataset/doc-0001",
              "modified": "2024-05-08",
              "distribution": [{{"downloadURL": "{base}/files/hospitals.csv"}}],
              "theme": ["Doctors and clinicians"]}}
        ]"#
    );
    let path = root.join("items.json");
    std::fs::write(path.as_std_path(), manifest).unwrap();
    path
}

#[test]
fn one_success_one_not_found() {
    let server = spawn_catalog_server();
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let manifest = write_manifest(&root, &server.base);

    let client = CatalogHttpClient::new(Some(Duration::from_secs(10))).unwrap();
    let app = App::new(Store::new(root.join("data")), client);
    let result = app
        .run(&manifest, "Hospitals", &SyncOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(result.matched, 2);
    assert_eq!(result.downloaded, 1);
    assert_eq!(result.failed, 1);
    assert!(matches!(
        &result.items[1],
        RecordOutcome::Failed { id: Some(id), reason, .. }
            if id == "gone-0404" && reason.contains("404")
    ));

    let ok: DatasetId = "xubh-q36u".parse().unwrap();
    let artifacts = app.store().list_artifacts(&ok).unwrap();
    assert_eq!(artifacts.len(), 1);
    let written = std::fs::read_to_string(artifacts[0].as_std_path()).unwrap();
    let mut lines = written.lines();
    assert_eq!(
        lines.next(),
        Some("facility_id,facility_name,hospital_overall_rating")
    );
    assert_eq!(lines.next(), Some("010001,\"SOUTHEAST HEALTH, INC\",3"));
    assert_eq!(lines.next(), Some("010005,MARSHALL MEDICAL CENTERS,4"));

    let missing: DatasetId = "gone-0404".parse().unwrap();
    assert!(!app.store().dataset_dir(&missing).as_std_path().exists());

    let ledger = Ledger::load(&app.store().ledger_path()).unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.get(&ok).unwrap().last_modified_date, "2024-05-08");

    let again = app
        .run(&manifest, "Hospitals", &SyncOptions::default(), &JsonOutput)
        .unwrap();
    assert_eq!(again.downloaded, 0);
    assert_eq!(again.skipped, 1);
    assert_eq!(again.failed, 1);
    assert_eq!(server.csv_requests.load(Ordering::Relaxed), 1);

    server.shutdown();
}
