use super::*;
use futures::TryStreamExt;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use std::fs;
use tempfile::TempDir;

fn options(max_tokens: usize, overlap: usize, strategy: ProcessingStrategy) -> IngestOptions {
    IngestOptions {
        token_unit: TokenUnit::Word,
        chunking: ChunkingConfig::new(max_tokens, overlap).expect("valid chunking config"),
        strategy,
    }
}

fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("should write test file");
    path
}

async fn collect(stream: ChunkStream) -> Result<Vec<ChunkBatch>> {
    stream.try_collect().await
}

fn text_line(text: &str) -> Content {
    Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 24.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    }
}

/// A page whose font operand is not a name, so text extraction fails
fn unreadable_line() -> Content {
    Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![7.into(), 24.into()]),
            Operation::new("Tj", vec![Object::string_literal("lost words")]),
            Operation::new("ET", vec![]),
        ],
    }
}

/// Build a PDF with one text line per page
pub(crate) fn write_pdf(dir: &TempDir, name: &str, pages: &[&str]) -> PathBuf {
    let contents: Vec<Content> = pages.iter().map(|text| text_line(text)).collect();
    write_pdf_pages(dir, name, contents)
}

fn write_pdf_pages(dir: &TempDir, name: &str, pages: Vec<Content>) -> PathBuf {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for content in pages {
        let encoded = content.encode().expect("should encode page content");
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let path = dir.path().join(name);
    doc.save(&path).expect("should save test PDF");
    path
}

#[test]
fn format_detection_by_extension() {
    assert_eq!(
        FileFormat::from_path(Path::new("notes.TXT")).expect("txt"),
        FileFormat::Text
    );
    assert_eq!(
        FileFormat::from_path(Path::new("README.md")).expect("md"),
        FileFormat::Markdown
    );
    assert_eq!(
        FileFormat::from_path(Path::new("a/b/data.json")).expect("json"),
        FileFormat::Json
    );
    assert_eq!(
        FileFormat::from_path(Path::new("rows.csv")).expect("csv"),
        FileFormat::Csv
    );
    assert_eq!(
        FileFormat::from_path(Path::new("paper.pdf")).expect("pdf"),
        FileFormat::Pdf
    );
    assert_eq!(
        FileFormat::from_path(Path::new("report.docx")).expect("docx"),
        FileFormat::Docx
    );
    assert!(matches!(
        FileFormat::from_path(Path::new("image.png")),
        Err(RagError::UnsupportedFileType(ext)) if ext == "png"
    ));
    assert!(matches!(
        FileFormat::from_path(Path::new("Makefile")),
        Err(RagError::UnsupportedFileType(_))
    ));
}

#[test]
fn progress_fraction() {
    assert!((Progress::new(4, 1).fraction() - 0.25).abs() < f64::EPSILON);
    assert!(Progress::new(0, 0).is_complete());
    assert!(!Progress::new(2, 1).is_complete());
}

#[tokio::test]
async fn full_text_strategy_leaves_keywords_empty() {
    let chunks = process_chunks(
        vec!["the quick".to_string(), "brown fox".to_string()],
        3,
        ProcessingStrategy::FullText,
    )
    .await;

    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c.keywords.is_empty()));
    assert!(chunks.iter().all(|c| c.page_index == 3));
    assert_eq!(chunks[1].local_chunk_index, 1);
    assert_eq!(chunks[1].text, "brown fox");
}

#[tokio::test]
async fn keyword_strategy_tags_every_chunk_in_order() {
    let texts: Vec<String> = (0..50)
        .map(|i| format!("the database {} stores vectors quickly", i))
        .collect();
    let chunks = process_chunks(texts.clone(), 0, ProcessingStrategy::ExtractKeywords).await;

    assert_eq!(chunks.len(), 50);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.local_chunk_index, i);
        assert_eq!(chunk.text, texts[i]);
        assert_eq!(chunk.keywords, "database stores vectors quickly");
    }
}

#[tokio::test]
async fn text_file_is_one_unit() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_file(&dir, "fox.txt", "The quick brown fox");

    let batches = collect(process_file(
        path,
        FileFormat::Text,
        options(2, 0, ProcessingStrategy::FullText),
    ))
    .await
    .expect("text ingestion should succeed");

    assert_eq!(batches.len(), 1);
    let (chunks, progress) = &batches[0];
    assert_eq!(*progress, Progress::new(1, 1));
    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["the quick", "brown fox"]);
}

#[tokio::test]
async fn empty_text_file_fails() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_file(&dir, "empty.md", "");

    let result = collect(process_file(
        path,
        FileFormat::Markdown,
        IngestOptions::default(),
    ))
    .await;

    assert!(matches!(result, Err(RagError::FileEmpty(_))));
}

#[tokio::test]
async fn json_object_is_canonicalized() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_file(&dir, "doc.json", r#"{"zeta": "last", "alpha": {"b": 2, "a": 1}}"#);

    let batches = collect(process_file(
        path,
        FileFormat::Json,
        IngestOptions {
            token_unit: TokenUnit::Document,
            ..IngestOptions::default()
        },
    ))
    .await
    .expect("json ingestion should succeed");

    assert_eq!(batches.len(), 1);
    let (chunks, progress) = &batches[0];
    assert_eq!(*progress, Progress::new(1, 1));
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, r#"alpha":{"a":1,"b":2},"zeta":"last"#);
}

#[test]
fn canonical_json_rejects_arrays_and_garbage() {
    assert!(matches!(
        canonical_json("[1, 2, 3]"),
        Err(RagError::InvalidJsonFormat(_))
    ));
    assert!(matches!(
        canonical_json("{not json"),
        Err(RagError::InvalidJsonFormat(_))
    ));
    assert!(matches!(
        canonical_json("42"),
        Err(RagError::InvalidJsonFormat(_))
    ));
    assert_eq!(
        canonical_json(r#"{"b": [ {"y": 1, "x": 2} ], "a": null}"#).expect("valid object"),
        r#"{"a":null,"b":[{"x":2,"y":1}]}"#
    );
}

#[tokio::test]
async fn json_array_file_fails() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_file(&dir, "list.json", "[]");

    let result = collect(process_file(
        path,
        FileFormat::Json,
        IngestOptions::default(),
    ))
    .await;

    assert!(matches!(result, Err(RagError::InvalidJsonFormat(_))));
}

#[tokio::test]
async fn csv_lines_are_tokens() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_file(
        &dir,
        "rows.csv",
        "name,age\n\nalice,30\n   \nbob,41\ncarol,27\n",
    );

    let batches = collect(process_file(
        path,
        FileFormat::Csv,
        options(2, 0, ProcessingStrategy::FullText),
    ))
    .await
    .expect("csv ingestion should succeed");

    assert_eq!(batches.len(), 1);
    let texts: Vec<&str> = batches[0].0.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["name,age alice,30", "bob,41 carol,27"]);
}

#[tokio::test]
async fn docx_is_unsupported() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_file(&dir, "report.docx", "not really a docx");

    let result = collect(process_file(
        path,
        FileFormat::Docx,
        IngestOptions::default(),
    ))
    .await;

    assert!(matches!(
        result,
        Err(RagError::UnsupportedOperation(op)) if op == "docx"
    ));
}

#[tokio::test]
async fn raw_text_is_one_unit() {
    let batches = collect(process_text(
        "alpha beta gamma delta".to_string(),
        options(3, 1, ProcessingStrategy::ExtractKeywords),
    ))
    .await
    .expect("text ingestion should succeed");

    assert_eq!(batches.len(), 1);
    let (chunks, progress) = &batches[0];
    assert_eq!(*progress, Progress::new(1, 1));
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].text, "alpha beta gamma");
    assert_eq!(chunks[1].text, "gamma delta");
    assert!(!chunks[0].keywords.is_empty());
}

#[tokio::test]
async fn blank_raw_text_fails() {
    let result = collect(process_text("  \n".to_string(), IngestOptions::default())).await;
    assert!(matches!(result, Err(RagError::InvalidInput(_))));
}

#[test]
fn batch_sizing() {
    assert_eq!(pdf::pages_per_batch(1, 8), 1);
    assert_eq!(pdf::pages_per_batch(7, 8), 1);
    assert_eq!(pdf::pages_per_batch(16, 8), 2);
    assert_eq!(pdf::pages_per_batch(17, 8), 2);
    assert_eq!(pdf::pages_per_batch(10, 0), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pdf_reports_progress_per_page() {
    let dir = TempDir::new().expect("should create temp dir");
    let pages = ["first page text", "second page text", "third page text"];
    let path = write_pdf(&dir, "three.pdf", &pages);

    let batches = collect(process_file(
        path,
        FileFormat::Pdf,
        options(8, 0, ProcessingStrategy::FullText),
    ))
    .await
    .expect("pdf ingestion should succeed");

    assert_eq!(batches.len(), 3);
    let mut last = 0;
    for (_, progress) in &batches {
        assert_eq!(progress.total_units, 3);
        assert!(progress.completed_units > last);
        last = progress.completed_units;
    }
    assert_eq!(last, 3);

    let mut page_indices: Vec<usize> = batches
        .iter()
        .flat_map(|(chunks, _)| chunks.iter().map(|c| c.page_index))
        .collect();
    page_indices.sort_unstable();
    page_indices.dedup();
    assert!(page_indices.iter().all(|&index| index < 3));
}

#[tokio::test]
async fn corrupt_pdf_fails() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_file(&dir, "broken.pdf", "this is not a pdf");

    let result = collect(process_file(
        path,
        FileFormat::Pdf,
        IngestOptions::default(),
    ))
    .await;

    assert!(matches!(result, Err(RagError::InvalidInput(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreadable_pdf_pages_are_skipped() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_pdf_pages(
        &dir,
        "partly_broken.pdf",
        vec![
            text_line("Alpha page"),
            unreadable_line(),
            text_line("Gamma page"),
        ],
    );

    let batches = collect(process_file(
        path,
        FileFormat::Pdf,
        options(8, 0, ProcessingStrategy::FullText),
    ))
    .await
    .expect("a bad page must not fail the document");

    assert_eq!(batches.len(), 3);
    let last = batches.last().map(|(_, progress)| *progress);
    assert_eq!(last, Some(Progress::new(3, 3)));

    let chunks: Vec<&Chunk> = batches.iter().flat_map(|(chunks, _)| chunks).collect();
    assert!(chunks.iter().all(|chunk| chunk.page_index != 1));
    assert!(chunks.iter().all(|chunk| !chunk.text.contains("lost")));
    let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
    assert!(texts.iter().any(|text| text.contains("alpha page")));
    assert!(texts.iter().any(|text| text.contains("gamma page")));
}

#[tokio::test]
async fn text_stream_ends_after_its_only_unit() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_file(&dir, "fox.txt", "the quick brown fox");

    let mut stream = process_file(path, FileFormat::Text, IngestOptions::default());
    let first = stream.next().await;
    assert!(matches!(first, Some(Ok((_, progress))) if progress == Progress::new(1, 1)));
    assert!(stream.next().await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pdf_producer_stops_when_the_consumer_goes_away() {
    let dir = TempDir::new().expect("should create temp dir");
    let texts: Vec<String> = (0..24).map(|i| format!("page number {i}")).collect();
    let pages: Vec<&str> = texts.iter().map(String::as_str).collect();
    let path = write_pdf(&dir, "long.pdf", &pages);

    let (mut tx, mut rx) = mpsc::channel(0);
    let producer = tokio::spawn(async move {
        let outcome =
            pdf::process_pdf(&path, options(8, 0, ProcessingStrategy::FullText), &mut tx).await;
        (outcome, tx.is_closed())
    });

    let first = rx.next().await;
    assert!(matches!(first, Some(Ok((_, progress))) if progress.completed_units == 1));
    drop(rx);

    let (outcome, closed) = tokio::time::timeout(std::time::Duration::from_secs(10), producer)
        .await
        .expect("producer should stop once the consumer is gone")
        .expect("producer task should not panic");
    assert!(outcome.is_ok());
    assert!(closed);
}
