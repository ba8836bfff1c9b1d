use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use facematch::driver::{doubles_embeddings, list_candidates};
use facematch::{run, EmbedError, Embedding, EmbeddingProvider, RankError, RankOutcome, RunOptions};
use tempfile::TempDir;

/// Serves embeddings by file name; unknown files have no face
#[derive(Default)]
struct MapProvider {
    embeddings: HashMap<String, Vec<f32>>,
    calls: Vec<(PathBuf, String)>,
}

impl MapProvider {
    fn with(mut self, name: &str, values: &[f32]) -> Self {
        self.embeddings.insert(name.to_string(), values.to_vec());
        self
    }
}

impl EmbeddingProvider for MapProvider {
    fn embed(&mut self, path: &Path, model_name: &str) -> Result<Embedding, EmbedError> {
        self.calls.push((path.to_path_buf(), model_name.to_string()));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        self.embeddings
            .get(&name)
            .map(|v| Embedding::from(v.clone()))
            .ok_or(EmbedError::NoFace {
                path: path.to_path_buf(),
            })
    }
}

fn doubles_dir(files: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in files {
        fs::write(dir.path().join(name), b"not really an image").unwrap();
    }
    dir
}

fn extensions() -> Vec<String> {
    vec![".jpg".into(), ".jpeg".into(), ".png".into()]
}

fn options(doubles: &Path) -> RunOptions {
    RunOptions {
        subject_path: PathBuf::from("subject.jpg"),
        doubles_path: doubles.to_path_buf(),
        model_name: "VGG-Face".to_string(),
        verbose: false,
        extensions: extensions(),
    }
}

fn names(outcome: &RankOutcome) -> Vec<&str> {
    outcome.entries().iter().map(|e| e.name.as_str()).collect()
}

#[test]
fn test_unit_axes_ranking() {
    let dir = doubles_dir(&["a.jpg", "b.png", "c.jpeg"]);
    let mut provider = MapProvider::default()
        .with("subject.jpg", &[1.0, 0.0])
        .with("a.jpg", &[1.0, 0.0])
        .with("b.png", &[0.0, 1.0])
        .with("c.jpeg", &[-1.0, 0.0]);

    let outcome = run(&mut provider, &options(dir.path())).unwrap();
    assert_eq!(names(&outcome), ["a.jpg", "b.png", "c.jpeg"]);
    let scores: Vec<f32> = outcome.entries().iter().map(|e| e.score).collect();
    assert!((scores[0] - 1.0).abs() < 1e-6);
    assert!(scores[1].abs() < 1e-6);
    assert!((scores[2] + 1.0).abs() < 1e-6);
}

#[test]
fn test_invalid_images_are_excluded() {
    // three embeddable images, two that fail, one unsupported extension
    let dir = doubles_dir(&[
        "one.jpg",
        "two.png",
        "three.jpeg",
        "blurry.jpg",
        "corrupt.png",
        "notes.txt",
    ]);
    let mut provider = MapProvider::default()
        .with("subject.jpg", &[0.2, 0.9, 0.1])
        .with("one.jpg", &[0.1, 0.8, 0.3])
        .with("two.png", &[0.9, 0.1, 0.0])
        .with("three.jpeg", &[0.2, 0.9, 0.1])
        .with("notes.txt", &[0.2, 0.9, 0.1]);

    let outcome = run(&mut provider, &options(dir.path())).unwrap();
    assert_eq!(outcome.entries().len(), 3);
    assert_eq!(names(&outcome)[0], "three.jpeg");
    for pair in outcome.entries().windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert!(provider.calls.iter().all(|(p, _)| !p.ends_with("notes.txt")));
}

#[test]
fn test_subject_failure_ranks_nothing() {
    let dir = doubles_dir(&["a.jpg", "b.jpg"]);
    let mut provider = MapProvider::default()
        .with("a.jpg", &[1.0, 0.0])
        .with("b.jpg", &[0.0, 1.0]);

    let outcome = run(&mut provider, &options(dir.path())).unwrap();
    assert!(outcome.entries().is_empty());
    match &outcome {
        RankOutcome::SubjectUnavailable { reason } => assert!(reason.contains("subject.jpg")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    // candidates are never embedded once the subject fails
    assert_eq!(provider.calls.len(), 1);
}

#[test]
fn test_empty_directory() {
    let dir = doubles_dir(&[]);
    let mut provider = MapProvider::default().with("subject.jpg", &[1.0]);

    let outcome = run(&mut provider, &options(dir.path())).unwrap();
    assert_eq!(outcome, RankOutcome::Empty);
    assert!(outcome.entries().is_empty());
}

#[test]
fn test_no_supported_extensions() {
    let dir = doubles_dir(&["a.gif", "b.bmp", "c.JPG", "d.PNG"]);
    let mut provider = MapProvider::default()
        .with("subject.jpg", &[1.0])
        .with("c.JPG", &[1.0])
        .with("d.PNG", &[1.0]);

    let outcome = run(&mut provider, &options(dir.path())).unwrap();
    assert_eq!(outcome, RankOutcome::Empty);
    assert_eq!(provider.calls.len(), 1);
}

#[test]
fn test_all_candidates_failing_is_empty() {
    let dir = doubles_dir(&["a.jpg", "b.jpg"]);
    let mut provider = MapProvider::default().with("subject.jpg", &[1.0, 0.0]);

    let outcome = run(&mut provider, &options(dir.path())).unwrap();
    assert_eq!(outcome, RankOutcome::Empty);
    assert_eq!(provider.calls.len(), 3);
}

#[test]
fn test_model_name_reaches_provider() {
    let dir = doubles_dir(&["a.jpg"]);
    let mut provider = MapProvider::default()
        .with("subject.jpg", &[1.0])
        .with("a.jpg", &[1.0]);
    let opts = RunOptions {
        model_name: "ArcFace".to_string(),
        ..options(dir.path())
    };

    run(&mut provider, &opts).unwrap();
    assert_eq!(provider.calls.len(), 2);
    assert!(provider.calls.iter().all(|(_, model)| model == "ArcFace"));
}

#[test]
fn test_ties_follow_file_name_order() {
    let dir = doubles_dir(&["zed.jpg", "amy.jpg", "mia.jpg"]);
    let mut provider = MapProvider::default()
        .with("subject.jpg", &[1.0, 0.0])
        .with("zed.jpg", &[2.0, 0.0])
        .with("amy.jpg", &[4.0, 0.0])
        .with("mia.jpg", &[1.0, 0.0]);

    let outcome = run(&mut provider, &options(dir.path())).unwrap();
    assert_eq!(names(&outcome), ["amy.jpg", "mia.jpg", "zed.jpg"]);
}

#[test]
fn test_missing_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    let mut provider = MapProvider::default().with("subject.jpg", &[1.0]);

    let err = run(&mut provider, &options(&missing)).unwrap_err();
    assert!(matches!(err, RankError::ListDirectory { ref path, .. } if path == &missing));
}

#[test]
fn test_mismatched_dimensions_are_reported() {
    let dir = doubles_dir(&["a.jpg"]);
    let mut provider = MapProvider::default()
        .with("subject.jpg", &[1.0, 0.0])
        .with("a.jpg", &[1.0, 0.0, 0.0]);

    let err = run(&mut provider, &options(dir.path())).unwrap_err();
    assert!(matches!(err, RankError::DimensionMismatch { .. }));
}

#[test]
fn test_list_candidates_filters() {
    let dir = doubles_dir(&["b.png", "a.jpeg", "c.jpg", "readme.md", "photo.JPEG"]);
    fs::create_dir(dir.path().join("folder.jpg")).unwrap();

    let found: Vec<String> = list_candidates(dir.path(), &extensions())
        .unwrap()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(found, ["a.jpeg", "b.png", "c.jpg"]);
}

#[test]
fn test_doubles_embeddings_keeps_names() {
    let dir = doubles_dir(&["x.jpg", "y.jpg"]);
    let mut provider = MapProvider::default().with("y.jpg", &[0.5, 0.5]);

    let embeddings = doubles_embeddings(&mut provider, dir.path(), "VGG-Face", &extensions())
        .unwrap();
    assert_eq!(embeddings.len(), 1);
    assert_eq!(embeddings[0].0, "y.jpg");
    assert_eq!(embeddings[0].1, Embedding::from(vec![0.5, 0.5]));
}
