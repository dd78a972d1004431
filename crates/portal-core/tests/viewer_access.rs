use doc_model::{NewCaseRecord, PortalConfig, Slug};
use portal_core::{
    hash_access_password, AccessError, CaseAdmin, GeoLocation, GeoLookup, NoGeoLookup,
    ViewerService, Visitor, PAGE_SIZE,
};
use storage::memory::MemoryStore;
use storage::{RecordStore, StorageError};

struct FixedGeo;

impl GeoLookup for FixedGeo {
    fn locate(&self, _visitor: &Visitor) -> Option<GeoLocation> {
        Some(GeoLocation {
            ip: Some("198.51.100.20".to_owned()),
            city: Some("Curitiba".to_owned()),
            region: Some("Paraná".to_owned()),
        })
    }
}

fn slug(text: &str) -> Slug {
    text.parse().expect("slug should parse")
}

fn seed(store: &MemoryStore, slug_text: &str, password: Option<&str>) {
    let slug = slug(slug_text);
    store
        .insert(NewCaseRecord {
            access_password_hash: password.map(|password| hash_access_password(&slug, password)),
            slug,
            case_number: format!("case-{slug_text}"),
            title: "Sentença".to_owned(),
            video_url: "memory://videos/v.mp4".to_owned(),
            pdf_url: "memory://documents/d.pdf".to_owned(),
        })
        .expect("seed insert should succeed");
}

fn browser() -> Visitor {
    Visitor { ip: None, user_agent: Some("Mozilla/5.0 (iPhone)".to_owned()) }
}

#[test]
fn open_case_counts_the_view_and_logs_it() {
    let store = MemoryStore::new();
    seed(&store, "AB12CD", None);
    let viewer = ViewerService::new(&store, &FixedGeo);

    let page = viewer.open("AB12CD", None, &browser()).expect("access should be granted");

    assert_eq!(page.views, 1);
    assert_eq!(page.title, "Sentença");

    let logs = store.view_logs(&slug("AB12CD")).expect("logs");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].location, "Curitiba, Paraná");
    assert_eq!(logs[0].ip.as_deref(), Some("198.51.100.20"));
    assert_eq!(logs[0].device, "Mozilla/5.0 (iPhone)");
}

#[test]
fn unknown_or_malformed_slug_is_not_found() {
    let store = MemoryStore::new();
    let viewer = ViewerService::new(&store, &NoGeoLookup);

    assert!(matches!(viewer.open("ZZ9999", None, &browser()), Err(AccessError::NotFound)));
    assert!(matches!(viewer.open("not-a-slug", None, &browser()), Err(AccessError::NotFound)));
}

#[test]
fn protected_case_requires_the_right_password() {
    let store = MemoryStore::new();
    seed(&store, "AB12CD", Some("segredo"));
    let viewer = ViewerService::new(&store, &NoGeoLookup);

    assert!(viewer.requires_password("AB12CD").expect("lookup"));
    assert!(matches!(
        viewer.open("AB12CD", None, &browser()),
        Err(AccessError::PasswordRequired)
    ));
    assert!(matches!(
        viewer.open("AB12CD", Some(""), &browser()),
        Err(AccessError::PasswordRequired)
    ));
    assert!(matches!(
        viewer.open("AB12CD", Some("errado"), &browser()),
        Err(AccessError::WrongPassword)
    ));
    assert!(store.all_view_logs().is_empty());

    let page = viewer.open("AB12CD", Some("segredo"), &browser()).expect("correct password");
    assert_eq!(page.views, 1);
}

#[test]
fn telemetry_failures_never_deny_access() {
    let store = MemoryStore::new();
    seed(&store, "AB12CD", None);
    store.fail_next_view_log(StorageError::Transport("offline".to_owned()));
    let viewer = ViewerService::new(&store, &NoGeoLookup);

    let page = viewer
        .open("AB12CD", None, &Visitor::default())
        .expect("access should be granted");

    assert_eq!(page.views, 1);
    assert!(store.all_view_logs().is_empty());

    viewer.open("AB12CD", None, &Visitor::default()).expect("second view");
    let logs = store.all_view_logs();
    assert_eq!(logs[0].location, "Unknown");
    assert_eq!(logs[0].device, "Unknown");
}

#[test]
fn admin_lists_searches_and_deletes() {
    let config = PortalConfig::default();
    let store = MemoryStore::new();
    for index in 0..(PAGE_SIZE + 2) {
        seed(&store, &format!("AAAA{index:02}"), None);
    }
    let admin = CaseAdmin::new(&config, &store);

    assert_eq!(admin.list().expect("list").len(), PAGE_SIZE + 2);

    let first = admin.search(None, 1).expect("search");
    assert_eq!((first.cases.len(), first.total, first.page_count), (PAGE_SIZE, PAGE_SIZE + 2, 2));
    let second = admin.search(None, 2).expect("search");
    assert_eq!(second.cases.len(), 2);

    let narrowed = admin.search(Some("CASE-aaaa03"), 1).expect("search");
    assert_eq!(narrowed.total, 1);
    let target = narrowed.cases[0].clone();

    assert_eq!(admin.landing_url(&target.slug), "http://localhost:5173/?v=AAAA03");
    assert!(admin.delete(target.id).expect("delete"));
    assert!(!admin.delete(target.id).expect("delete"));
    assert_eq!(admin.search(Some("aaaa03"), 1).expect("search").total, 0);
}

#[test]
fn admin_history_is_newest_first() {
    let config = PortalConfig::default();
    let store = MemoryStore::new();
    seed(&store, "AB12CD", None);
    let viewer = ViewerService::new(&store, &FixedGeo);
    for _ in 0..3 {
        viewer.open("AB12CD", None, &browser()).expect("view");
    }

    let history = CaseAdmin::new(&config, &store).history(&slug("AB12CD")).expect("history");

    assert_eq!(history.len(), 3);
    assert!(history.windows(2).all(|pair| pair[0].viewed_at >= pair[1].viewed_at));
}

#[test]
fn admin_page_past_the_end_is_empty() {
    let config = PortalConfig::default();
    let store = MemoryStore::new();
    seed(&store, "AB12CD", None);
    let admin = CaseAdmin::new(&config, &store);

    let far = admin.search(None, usize::MAX / 2).expect("search");
    assert!(far.cases.is_empty());
    assert_eq!((far.total, far.page_count), (1, 1));

    assert_eq!(admin.search(None, 0).expect("search").cases.len(), 1);
}
