mod common;

use std::fs;

use assert_cmd::Command;
use common::TestWorkspace;
use predicates::str::contains;

fn bin() -> Command {
    Command::cargo_bin("contact-ledger").expect("binary exists")
}

#[test]
fn import_then_export_round_trips_through_the_store() {
    let workspace = TestWorkspace::new();
    let input = workspace.write(
        "contacts.csv",
        "Name;Email;Outlets;Countries\n\
         Ada Lovelace;ada@example.com;Acme Times;France\n\
         Grace Hopper;grace@example.com;Acme Times;Narnia\n",
    );
    let countries = workspace.write("countries.txt", "France\nGermany\n");
    let store = workspace.path().join("store.json");
    let report = workspace.path().join("report.json");

    bin()
        .args([
            "import",
            "-i",
            input.to_str().unwrap(),
            "--store",
            store.to_str().unwrap(),
            "--countries",
            countries.to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
            "--progress",
            "off",
        ])
        .assert()
        .success()
        .stdout(contains("valid    2"))
        .stdout(contains("Narnia"));

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report).expect("read report")).expect("json");
    assert_eq!(report["success"], true);
    assert_eq!(report["totalRows"], 2);
    assert_eq!(report["errors"][0]["line"], 3);
    assert_eq!(report["errors"][0]["row"]["Countries"], "Narnia");

    let output = workspace.path().join("out.csv");
    bin()
        .args([
            "export",
            "--store",
            store.to_str().unwrap(),
            "-C",
            "name,outlets,countries",
            "-o",
            output.to_str().unwrap(),
        ])
        .assert()
        .success();
    let exported = fs::read_to_string(&output).expect("read export");
    assert_eq!(
        exported,
        "\"name\",\"outlets\",\"countries\"\n\
         \"Ada Lovelace\",\"Acme Times\",\"France\"\n\
         \"Grace Hopper\",\"Acme Times\",\"\"\n"
    );
}

#[test]
fn missing_header_fails_and_leaves_store_empty() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("contacts.csv", "name,title\nAda,Analyst\n");
    let store = workspace.path().join("store.json");

    bin()
        .args([
            "import",
            "-i",
            input.to_str().unwrap(),
            "--store",
            store.to_str().unwrap(),
            "--progress",
            "off",
            "--json",
        ])
        .assert()
        .failure()
        .stdout(contains("\"totalRows\": 0"))
        .stderr(contains("Missing required column(s): email"));

    bin()
        .args(["export", "--store", store.to_str().unwrap(), "-C", "email"])
        .assert()
        .success()
        .stdout("\"email\"\n");
}

#[test]
fn validate_reports_problems_without_a_store() {
    let workspace = TestWorkspace::new();
    let input = workspace.write(
        "contacts.tsv",
        "name\temail\nAda\tada@example.com\nBob\tbob-at-example\n",
    );

    bin()
        .args(["validate", "-i", input.to_str().unwrap(), "--progress", "off"])
        .assert()
        .success()
        .stdout(contains("invalid  1"))
        .stdout(contains("Invalid email address 'bob-at-example'"));
}

#[test]
fn json_progress_ends_at_one_hundred_percent() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("contacts.csv", &common::contacts_csv(5));
    let store = workspace.path().join("store.json");

    bin()
        .args([
            "import",
            "-i",
            input.to_str().unwrap(),
            "--store",
            store.to_str().unwrap(),
            "--batch-size",
            "2",
            "--progress",
            "json",
        ])
        .assert()
        .success()
        .stderr(contains("\"currentOperation\":\"completed\""))
        .stderr(contains("\"percentage\":100.0"));
}

#[test]
fn init_config_writes_loadable_defaults() {
    let workspace = TestWorkspace::new();
    let config = workspace.path().join("pipeline.yaml");
    bin()
        .args(["init-config", "-o", config.to_str().unwrap()])
        .assert()
        .success();
    let contents = fs::read_to_string(&config).expect("read config");
    assert!(contents.contains("batch_size: 100"));
    assert!(contents.contains("write_mode: upsert"));

    let input = workspace.write("contacts.csv", &common::contacts_csv(1));
    bin()
        .args([
            "validate",
            "-i",
            input.to_str().unwrap(),
            "-c",
            config.to_str().unwrap(),
            "--progress",
            "off",
        ])
        .assert()
        .success();
}

#[test]
fn bad_filter_is_reported() {
    let workspace = TestWorkspace::new();
    let store = workspace.path().join("store.json");
    bin()
        .args([
            "export",
            "--store",
            store.to_str().unwrap(),
            "--filter",
            "name>5",
        ])
        .assert()
        .failure()
        .stderr(contains("only supported on 'id'"));
}
