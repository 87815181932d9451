mod common;

use std::sync::Arc;

use common::{InstrumentedRepository, new_contact};
use contact_ledger::{
    columns::{ContactField, parse_columns},
    export::{ExportRequest, export_contacts, export_to_string},
    filter::ContactFilter,
    import::{ImportSource, Importer},
    config::ImportSettings,
    progress::NoProgress,
    repository::{Repository, memory::MemoryRepository},
};

async fn seeded(count: usize) -> InstrumentedRepository {
    let inner = MemoryRepository::new();
    let contacts = (0..count)
        .map(|idx| new_contact(&format!("c{idx:04}@example.com")))
        .collect();
    inner.create_many_contacts(contacts, false).await.unwrap();
    InstrumentedRepository::new(inner)
}

#[tokio::test]
async fn pages_through_everything_with_bounded_fetches() {
    let repo = seeded(1200).await;
    let request = ExportRequest::new(vec![ContactField::Id, ContactField::Email]).with_page_size(500);

    let summary = export_contacts(&repo, &request, Vec::new()).await.unwrap();
    assert_eq!(summary.rows, 1200);
    assert_eq!(summary.pages, 3);
    assert_eq!(repo.page_sizes(), vec![500, 500, 200]);
}

#[tokio::test]
async fn repeated_exports_are_byte_identical_and_ordered_by_id() {
    let repo = seeded(40).await;
    let request = ExportRequest::new(vec![ContactField::Id, ContactField::Name]).with_page_size(7);

    let first = export_to_string(&repo, &request).await.unwrap();
    let second = export_to_string(&repo, &request).await.unwrap();
    assert_eq!(first, second);

    let ids: Vec<u64> = first
        .lines()
        .skip(1)
        .map(|line| line.split(',').next().unwrap().trim_matches('"').parse().unwrap())
        .collect();
    assert_eq!(ids.len(), 40);
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn imported_contacts_export_with_their_relations() {
    let workspace = common::TestWorkspace::new();
    let path = workspace.write(
        "contacts.csv",
        "name,email,title,outlets,beats,countries,socials\n\
         Ada Lovelace,ada@example.com,Analyst,\"Acme Times, Daily Ledger\",Math,France,@ada\n\
         Grace Hopper,grace@example.com,,Acme Times,,,\n",
    );
    let repo = Arc::new(MemoryRepository::with_countries(["France"]));
    let result = Importer::new(Arc::clone(&repo), ImportSettings::default())
        .run(&ImportSource::new(&path), &NoProgress)
        .await;
    assert!(result.success);

    let columns = parse_columns(&["name,email,title,outlets,beats,countries,socials".to_string()])
        .unwrap();
    let filter = ContactFilter::parse(&["outlets=Daily Ledger".to_string()]).unwrap();
    let request = ExportRequest::new(columns).with_filter(filter);
    let output = export_to_string(repo.as_ref(), &request).await.unwrap();

    assert_eq!(
        output,
        "\"name\",\"email\",\"title\",\"outlets\",\"beats\",\"countries\",\"socials\"\n\
         \"Ada Lovelace\",\"ada@example.com\",\"Analyst\",\"Acme Times, Daily Ledger\",\"Math\",\"France\",\"@ada\"\n"
    );
}

#[tokio::test]
async fn id_range_filters_combine_with_paging() {
    let repo = seeded(30).await;
    let filter = ContactFilter::parse(&["id>10".to_string(), "id<=20".to_string()]).unwrap();
    let request = ExportRequest::new(vec![ContactField::Id])
        .with_filter(filter)
        .with_page_size(4);

    let summary = export_contacts(&repo, &request, Vec::new()).await.unwrap();
    assert_eq!(summary.rows, 10);
    assert_eq!(repo.page_sizes(), vec![4, 4, 2]);
}
