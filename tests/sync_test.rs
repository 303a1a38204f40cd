//! Checkpoint, push and pull between on-disk replicas
//!
//! Replicas keep their own metadata records and share one payload directory.

use std::path::Path;
use trueno_mlrepo::array::NumericArray;
use trueno_mlrepo::kv::{DiskKvStore, KvStore};
use trueno_mlrepo::object::{CalibratedModel, Category, ParamValue, Payload, RawData, RepoObject};
use trueno_mlrepo::payload::ParquetPayloadStore;
use trueno_mlrepo::store::{Fetch, VersionSelector};
use trueno_mlrepo::sync::DirectoryRemote;
use trueno_mlrepo::{Error, RepoConfig, Repository};

type DiskRepo = Repository<DiskKvStore, ParquetPayloadStore>;

async fn replica(root: &Path, name: &str) -> DiskRepo {
    Repository::open(
        DiskKvStore::open(root.join(name)).unwrap(),
        ParquetPayloadStore::open(root.join("payload")).unwrap(),
        RepoConfig::builder().remote_timeout_ms(5_000).remote_retries(1).build(),
    )
    .await
    .unwrap()
}

fn raw(rows: usize) -> RepoObject {
    let x: Vec<Vec<f32>> = (0..rows).map(|i| vec![i as f32]).collect();
    let data = RawData::new(NumericArray::from_rows(&x).unwrap(), vec!["x".into()], None).unwrap();
    RepoObject::new("sensor", Category::RawData, Payload::RawData(data)).unwrap()
}

fn calibrated() -> RepoObject {
    RepoObject::new(
        "m/model",
        Category::CalibratedModel,
        Payload::CalibratedModel(CalibratedModel::new(ParamValue::from(1.5))),
    )
    .unwrap()
}

#[tokio::test]
async fn test_push_then_pull_transfers_objects_and_labels() {
    let dir = tempfile::tempdir().unwrap();
    let remote = DirectoryRemote::open(dir.path().join("remote")).unwrap();

    let origin = replica(dir.path(), "origin").await;
    origin.add(raw(4), "import").await.unwrap();
    origin.add(calibrated().with_modifier("sensor", 0), "fit").await.unwrap();
    origin.create_label("m", 0, "production", "promote").await.unwrap();
    let checkpoint = origin.checkpoint("release 1").await.unwrap();
    assert_eq!(checkpoint.last_commit(), Some(2));
    assert!(origin.push(&remote).await.unwrap() > 0);

    let clone = replica(dir.path(), "clone").await;
    assert!(clone.pull(&remote).await.unwrap() > 0);
    assert_eq!(clone.model_for_label("production").await, Some(("m/model".to_string(), 0)));
    assert_eq!(clone.get_label("m", 0).await.as_deref(), Some("production"));
    assert_eq!(clone.get_checkpoints().await.unwrap().len(), 1);

    let sensor = clone.get("sensor", VersionSelector::Latest, Fetch::Full).await.unwrap();
    assert_eq!(sensor.as_raw_data().unwrap().x_data().unwrap().data(), &[0.0, 1.0, 2.0, 3.0]);
    assert!(clone.check_integrity().await.is_ok());

    // nothing new the second time
    assert_eq!(clone.pull(&remote).await.unwrap(), 0);
}

#[tokio::test]
async fn test_pull_never_overwrites_local_versions() {
    let dir = tempfile::tempdir().unwrap();
    let remote = DirectoryRemote::open(dir.path().join("remote")).unwrap();

    let origin = replica(dir.path(), "origin").await;
    origin
        .add(RepoObject::new("p", Category::ModelParam, Payload::Params(ParamValue::from(1.0))).unwrap(), "remote p")
        .await
        .unwrap();
    origin.push(&remote).await.unwrap();

    let local = replica(dir.path(), "local").await;
    local
        .add(RepoObject::new("p", Category::ModelParam, Payload::Params(ParamValue::from(2.0))).unwrap(), "local p")
        .await
        .unwrap();
    local
        .add(RepoObject::new("q", Category::TrainingParam, Payload::Params(ParamValue::Null)).unwrap(), "local q")
        .await
        .unwrap();
    local.pull(&remote).await.unwrap();

    let p = local.get("p", VersionSelector::Latest, Fetch::Metadata).await.unwrap();
    assert_eq!(p.version(), 0);
    assert_eq!(p.as_params(), Some(&ParamValue::from(2.0)));
    assert_eq!(local.get_names(Category::TrainingParam).await, vec!["q".to_string()]);
}

#[tokio::test]
async fn test_checkpoint_refuses_dangling_lineage() {
    let dir = tempfile::tempdir().unwrap();
    let remote = DirectoryRemote::open(dir.path().join("remote")).unwrap();

    // a record written by a broken writer: it consumes a version nobody stored
    let orphan = RepoObject::new("orphan", Category::ModelParam, Payload::Params(ParamValue::Null))
        .unwrap()
        .with_modifier("ghost", 3);
    remote
        .kv()
        .set("obj:orphan#00000000000000000000", serde_json::to_vec(&orphan).unwrap())
        .await
        .unwrap();

    let local = replica(dir.path(), "local").await;
    local.pull(&remote).await.unwrap();
    assert_eq!(local.get_names(Category::ModelParam).await, vec!["orphan".to_string()]);

    let err = local.checkpoint("should fail").await.unwrap_err();
    assert!(matches!(err, Error::Integrity(ref msg) if msg.contains("ghost@3")), "{err}");
    assert!(local.get_checkpoints().await.unwrap().is_empty());
}
