use csv_importer::importer::structure_cache::load_structure;
use csv_importer::importer::{
    ImportEngine, ImportError, ImportLock, InitializationState, Model, ProcessingState, Structure,
};
use csv_importer::test_support::{TestDatabase, TestFixtures, write_workspace};
use std::path::Path;

const STRUCTURE: &str = r#"
cities:
  - id
  - name
towns:
  structure_schema_version: "1"
  table_name: towns
  csv_file_name: towns_export
  fields:
    - name: id
      unique: true
    - name: name
      label: Town name
ghosts:
  - id
  - haunted_since
future:
  structure_schema_version: "2"
codes:
  - id
  - code
pairs:
  structure_schema_version: "1"
  table_name: pairs
  fields:
    - name: a
      unique: true
    - name: b
      unique: true
    - name: c
unindexed:
  structure_schema_version: "1"
  table_name: cities
  csv_file_name: unindexed
  fields:
    - name: id
      unique: true
    - name: name
vanished:
  - id
"#;

const TABLES: &str = r#"
CREATE TABLE cities (id integer, name text);
CREATE TABLE towns (id integer PRIMARY KEY, name text NOT NULL);
CREATE TABLE ghosts (id integer);
CREATE TABLE codes (id integer, code varchar(3));
CREATE TABLE pairs (a integer UNIQUE, b text UNIQUE, c text);
"#;

struct Harness {
    db: TestDatabase,
    _dir: tempfile::TempDir,
    csv_dir: std::path::PathBuf,
    structure: Structure,
    lock: ImportLock,
    engine: ImportEngine,
}

impl Harness {
    async fn start(csv_files: &[(&str, &str)]) -> Option<Self> {
        let db = match TestDatabase::new_from_env().await {
            Ok(db) => db,
            Err(err) => {
                eprintln!("skipping importer integration test: {err}");
                return None;
            }
        };

        for statement in TABLES.split(';').filter(|s| !s.trim().is_empty()) {
            TestFixtures::new(db.pool())
                .execute(statement)
                .await
                .expect("create tables");
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let config = write_workspace(dir.path(), STRUCTURE, csv_files).expect("workspace");
        let structure = load_structure(&config.structure_path).expect("structure loads");
        let lock = ImportLock::new();
        let engine = ImportEngine::new(db.pool_clone(), lock.clone(), &config);

        Some(Self {
            csv_dir: config.csv_base_path.clone(),
            db,
            _dir: dir,
            structure,
            lock,
            engine,
        })
    }

    fn fixtures(&self) -> TestFixtures<'_> {
        TestFixtures::new(self.db.pool())
    }

    fn write_csv(&self, name: &str, contents: &str) {
        std::fs::write(self.csv_dir.join(format!("{name}.csv")), contents).expect("write csv");
    }

    fn model(&self, name: &str) -> Model {
        Model::new(&self.structure, name)
    }
}

fn row(values: &[&str]) -> Vec<Option<String>> {
    values.iter().map(|v| Some(v.to_string())).collect()
}

fn numbered_cities(count: usize) -> String {
    (1..=count).map(|i| format!("{i},City {i}\n")).collect()
}

#[tokio::test]
async fn cities_import_inserts_every_row() {
    let Some(h) = Harness::start(&[("cities", "1,Paris\n2,Lyon\n")]).await else {
        return;
    };

    let mut model = h.model("cities");
    let state = model.import(&h.engine).await;

    assert_eq!(state, ProcessingState::Success, "{:?}", model.message());
    assert!(
        model
            .message()
            .unwrap()
            .starts_with("Import of 2 entrie(s) from model \"cities\" in ")
    );
    assert_eq!(
        h.fixtures().rows("cities", &["id", "name"]).await.unwrap(),
        vec![row(&["1", "Paris"]), row(&["2", "Lyon"])]
    );
}

#[tokio::test]
async fn column_count_mismatch_leaves_the_table_untouched() {
    let Some(h) = Harness::start(&[("cities", "1,Paris\n3,Berlin,extra\n")]).await else {
        return;
    };
    h.fixtures()
        .execute("INSERT INTO cities VALUES (9, 'Rome')")
        .await
        .unwrap();

    let err = h.engine.import(&h.model("cities")).await.unwrap_err();
    assert!(matches!(
        err,
        ImportError::ColumnCountMismatch {
            row_index: 1,
            got: 3,
            expected: 2
        }
    ));

    let mut model = h.model("cities");
    assert_eq!(model.import(&h.engine).await, ProcessingState::Error);
    assert!(model.message().unwrap().contains("has not been modified"));
    assert_eq!(
        h.fixtures().rows("cities", &["id", "name"]).await.unwrap(),
        vec![row(&["9", "Rome"])]
    );
}

#[tokio::test]
async fn failure_in_a_later_batch_rolls_back_earlier_batches() {
    let Some(h) = Harness::start(&[("cities", "1,Paris\n2,Lyon\n3,Berlin,extra\n")]).await else {
        return;
    };
    let engine = ImportEngine::with_settings(
        h.db.pool_clone(),
        h.lock.clone(),
        h.csv_dir.clone(),
        1,
    );

    let mut model = h.model("cities");
    assert_eq!(model.import(&engine).await, ProcessingState::Error);
    assert_eq!(h.fixtures().count("cities").await.unwrap(), 0);
}

#[tokio::test]
async fn database_errors_roll_back_the_whole_import() {
    let Some(h) = Harness::start(&[("cities", "1,Paris\nnot-a-number,Lyon\n")]).await else {
        return;
    };

    let mut model = h.model("cities");
    assert_eq!(model.import(&h.engine).await, ProcessingState::Error);
    assert!(model.message().unwrap().contains("database error"));
    assert_eq!(h.fixtures().count("cities").await.unwrap(), 0);
    assert!(h.lock.try_acquire().is_some());
}

#[tokio::test]
async fn busy_lock_rejects_the_import_without_touching_the_table() {
    let Some(h) = Harness::start(&[("cities", "1,Paris\n")]).await else {
        return;
    };

    let guard = h.lock.try_acquire().expect("lock is free");
    let mut model = h.model("cities");
    assert_eq!(model.import(&h.engine).await, ProcessingState::Warning);
    assert_eq!(
        model.message(),
        Some("Cannot import a CSV file for now. There is already an ongoing operation.")
    );
    assert_eq!(h.fixtures().count("cities").await.unwrap(), 0);

    drop(guard);
    let mut model = h.model("cities");
    assert_eq!(model.import(&h.engine).await, ProcessingState::Success);
}

#[tokio::test]
async fn imports_without_unique_keys_append_duplicates() {
    let Some(h) = Harness::start(&[("cities", "1,Paris\n2,Lyon\n")]).await else {
        return;
    };

    for _ in 0..2 {
        let mut model = h.model("cities");
        assert_eq!(model.import(&h.engine).await, ProcessingState::Success);
    }

    assert_eq!(h.fixtures().count("cities").await.unwrap(), 4);
}

#[tokio::test]
async fn imports_with_unique_keys_upsert() {
    let Some(h) = Harness::start(&[("towns_export", "1,Paris\n2,Lyon\n")]).await else {
        return;
    };

    for _ in 0..2 {
        let mut model = h.model("towns");
        assert_eq!(model.import(&h.engine).await, ProcessingState::Success);
    }
    assert_eq!(h.fixtures().count("towns").await.unwrap(), 2);

    h.write_csv("towns_export", "1,Paris Centre\n3,Nice\n3,Nizza\n");
    let mut model = h.model("towns");
    assert_eq!(
        model.import(&h.engine).await,
        ProcessingState::Success,
        "{:?}",
        model.message()
    );

    assert_eq!(
        h.fixtures().rows("towns", &["id", "name"]).await.unwrap(),
        vec![
            row(&["1", "Paris Centre"]),
            row(&["2", "Lyon"]),
            row(&["3", "Nizza"]),
        ]
    );
}

#[tokio::test]
async fn missing_csv_is_reported_and_releases_the_lock() {
    let Some(h) = Harness::start(&[]).await else {
        return;
    };

    let err = h.engine.import(&h.model("cities")).await.unwrap_err();
    assert!(matches!(err, ImportError::FileNotFound(path) if path.ends_with("cities.csv")));
    assert!(!h.lock.is_busy());
}

#[tokio::test]
async fn unknown_columns_fail_before_writing() {
    let Some(h) = Harness::start(&[("ghosts", "1,1900\n")]).await else {
        return;
    };

    let err = h.engine.import(&h.model("ghosts")).await.unwrap_err();
    assert!(matches!(
        err,
        ImportError::UnknownColumn { ref column, .. } if column == "haunted_since"
    ));
    assert_eq!(h.fixtures().count("ghosts").await.unwrap(), 0);
}

#[tokio::test]
async fn invalid_models_are_not_imported() {
    let Some(h) = Harness::start(&[]).await else {
        return;
    };

    let mut model = h.model("future");
    assert_eq!(model.initialization_state(), InitializationState::Invalid);
    assert_eq!(model.import(&h.engine).await, ProcessingState::Error);
    assert!(model.message().unwrap().contains("\"2\""));
    assert!(!h.lock.is_busy());
}

#[tokio::test]
async fn purge_removes_every_row_under_the_lock() {
    let Some(h) = Harness::start(&[("cities", "1,Paris\n2,Lyon\n")]).await else {
        return;
    };
    let mut model = h.model("cities");
    assert_eq!(model.import(&h.engine).await, ProcessingState::Success);

    let guard = h.lock.try_acquire().expect("lock is free");
    let mut model = h.model("cities");
    assert_eq!(model.purge(&h.engine).await, ProcessingState::Warning);
    assert_eq!(h.fixtures().count("cities").await.unwrap(), 2);
    drop(guard);

    let mut model = h.model("cities");
    assert_eq!(model.purge(&h.engine).await, ProcessingState::Success);
    assert_eq!(
        model.message(),
        Some("Table cities has been purged. (2 entries removed)")
    );
    assert_eq!(h.fixtures().count("cities").await.unwrap(), 0);
    assert!(h.lock.try_acquire().is_some());
}

#[tokio::test]
async fn explicit_csv_file_overrides_the_base_directory() {
    let Some(h) = Harness::start(&[]).await else {
        return;
    };
    let other = h.csv_dir.join("elsewhere.csv");
    std::fs::write(&other, "7,Lille\n").unwrap();

    let mut model = Model::with_csv_file(&h.structure, "cities", other.clone());
    assert_eq!(model.csv_path(Path::new("/unused")), other);
    assert_eq!(model.import(&h.engine).await, ProcessingState::Success);
    assert_eq!(
        h.fixtures().rows("cities", &["id", "name"]).await.unwrap(),
        vec![row(&["7", "Lille"])]
    );
}

#[tokio::test]
async fn exactly_one_full_batch_is_one_statement() {
    let csv = numbered_cities(100);
    let Some(h) = Harness::start(&[("cities", csv.as_str())]).await else {
        return;
    };

    let report = h.engine.import(&h.model("cities")).await.unwrap();
    assert_eq!(report.rows_processed, 100);
    assert_eq!(report.batches, 1);
    assert_eq!(h.fixtures().count("cities").await.unwrap(), 100);
}

#[tokio::test]
async fn one_row_past_the_batch_size_opens_a_second_batch() {
    let csv = numbered_cities(101);
    let Some(h) = Harness::start(&[("cities", csv.as_str())]).await else {
        return;
    };

    let report = h.engine.import(&h.model("cities")).await.unwrap();
    assert_eq!(report.rows_processed, 101);
    assert_eq!(report.batches, 2);
    assert_eq!(h.fixtures().count("cities").await.unwrap(), 101);
}

#[tokio::test]
async fn values_longer_than_the_column_are_rejected_not_truncated() {
    let Some(h) = Harness::start(&[("codes", "1,FR\n2,Paris\n")]).await else {
        return;
    };

    let mut model = h.model("codes");
    assert_eq!(model.import(&h.engine).await, ProcessingState::Error);
    assert!(model.message().unwrap().contains("has not been modified"));
    assert_eq!(h.fixtures().count("codes").await.unwrap(), 0);

    h.write_csv("codes", "1,FR\n2,DE\n");
    let mut model = h.model("codes");
    assert_eq!(model.import(&h.engine).await, ProcessingState::Success);
    assert_eq!(
        h.fixtures().rows("codes", &["id", "code"]).await.unwrap(),
        vec![row(&["1", "FR"]), row(&["2", "DE"])]
    );
}

#[tokio::test]
async fn key_fields_with_separate_unique_indexes_upsert_on_one_of_them() {
    let Some(h) = Harness::start(&[("pairs", "1,x,foo\n")]).await else {
        return;
    };

    for _ in 0..2 {
        let mut model = h.model("pairs");
        assert_eq!(
            model.import(&h.engine).await,
            ProcessingState::Success,
            "{:?}",
            model.message()
        );
    }
    assert_eq!(h.fixtures().count("pairs").await.unwrap(), 1);

    h.write_csv("pairs", "1,x,bar\n2,y,baz\n");
    let mut model = h.model("pairs");
    assert_eq!(model.import(&h.engine).await, ProcessingState::Success);
    assert_eq!(
        h.fixtures().rows("pairs", &["a", "b", "c"]).await.unwrap(),
        vec![row(&["1", "x", "bar"]), row(&["2", "y", "baz"])]
    );
}

#[tokio::test]
async fn key_fields_without_a_unique_index_fail_before_writing() {
    let Some(h) = Harness::start(&[("unindexed", "1,Paris\n")]).await else {
        return;
    };

    let err = h.engine.import(&h.model("unindexed")).await.unwrap_err();
    assert!(matches!(
        err,
        ImportError::NoMatchingUniqueIndex { ref table, ref keys } if table == "cities" && keys == "id"
    ));
    assert_eq!(h.fixtures().count("cities").await.unwrap(), 0);
    assert!(!h.lock.is_busy());
}

#[tokio::test]
async fn purge_of_a_missing_table_fails_and_releases_the_lock() {
    let Some(h) = Harness::start(&[]).await else {
        return;
    };

    let err = h.engine.purge(&h.model("vanished")).await.unwrap_err();
    assert!(matches!(err, ImportError::TableNotFound(ref table) if table == "vanished"));
    assert!(!h.lock.is_busy());

    let mut model = h.model("vanished");
    assert_eq!(model.purge(&h.engine).await, ProcessingState::Error);
    assert!(model.message().unwrap().starts_with("Purge of vanished failed."));
    assert!(h.lock.try_acquire().is_some());
}
