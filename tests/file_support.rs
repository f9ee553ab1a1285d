//! Multi-format ingestion through the CLI: Office documents are extracted
//! and searchable, unreadable or oversized files fail individually, and the
//! resolved content type is recorded on the document.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kbchat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("kbchat");
    path
}

/// Zip archive holding the given `(entry name, xml)` parts.
fn ooxml_package(parts: &[(&str, String)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, xml) in parts {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn minimal_docx(phrase: &str) -> Vec<u8> {
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
        phrase
    );
    ooxml_package(&[("word/document.xml", xml)])
}

fn minimal_pptx(phrase: &str) -> Vec<u8> {
    let xml = format!(
        "<?xml version=\"1.0\"?><p:sld xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\" xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
        phrase
    );
    ooxml_package(&[("ppt/slides/slide1.xml", xml)])
}

fn minimal_xlsx(header: &str, value: &str) -> Vec<u8> {
    let shared = format!(
        "<?xml version=\"1.0\"?><sst xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\"><si><t>{}</t></si><si><t>{}</t></si></sst>",
        header, value
    );
    let sheet = "<?xml version=\"1.0\"?><worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\"><sheetData><row r=\"1\"><c r=\"A1\" t=\"s\"><v>0</v></c><c r=\"B1\" t=\"s\"><v>1</v></c></row></sheetData></worksheet>".to_string();
    ooxml_package(&[
        ("xl/sharedStrings.xml", shared),
        ("xl/worksheets/sheet1.xml", sheet),
    ])
}

fn setup_env(max_file_bytes: u64) -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/kbchat.sqlite"

[storage]
root = "{root}/data/uploads"

[embedding]
provider = "hashed"
dims = 1024

[ingest]
max_file_bytes = {max_file_bytes}
"#,
        root = root.display(),
        max_file_bytes = max_file_bytes
    );
    let config_path = root.join("config").join("kbchat.toml");
    fs::write(&config_path, config_content).unwrap();

    fs::write(files_dir.join("readme.md"), "# Readme\n\nPlain text file for tests.\n").unwrap();

    (tmp, config_path, files_dir)
}

fn run_kbchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(kbchat_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kbchat: {}", e));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn file_support_docx_ingest_and_search() {
    let (_tmp, config_path, files_dir) = setup_env(1_000_000);
    fs::write(files_dir.join("handbook.docx"), minimal_docx("forklift safety inspection")).unwrap();

    let (stdout, stderr, success) =
        run_kbchat(&config_path, &["ingest", files_dir.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("2 ingested, 0 failed"), "{}", stdout);

    let (search_out, _, success) = run_kbchat(&config_path, &["search", "forklift safety inspection"]);
    assert!(success, "search failed");
    assert!(search_out.starts_with("1. ["), "{}", search_out);
    assert!(search_out.contains("handbook.docx"), "{}", search_out);
    assert!(search_out.contains("forklift safety inspection"), "{}", search_out);
}

#[test]
fn file_support_pptx_and_xlsx() {
    let (_tmp, config_path, files_dir) = setup_env(1_000_000);
    fs::write(files_dir.join("training.pptx"), minimal_pptx("pallet wrapping technique")).unwrap();
    fs::write(files_dir.join("bins.xlsx"), minimal_xlsx("Bin", "Aisle seven overflow")).unwrap();

    let (stdout, stderr, success) =
        run_kbchat(&config_path, &["ingest", files_dir.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("3 ingested, 0 failed"), "{}", stdout);

    let (search_out, _, _) = run_kbchat(&config_path, &["search", "pallet wrapping technique"]);
    assert!(search_out.contains("training.pptx"), "{}", search_out);

    let (search_out, _, _) = run_kbchat(&config_path, &["search", "aisle seven overflow"]);
    assert!(search_out.contains("bins.xlsx"), "{}", search_out);
}

#[test]
fn file_support_corrupt_pdf_fails_alone() {
    let (_tmp, config_path, files_dir) = setup_env(1_000_000);
    fs::write(files_dir.join("bad.pdf"), b"not a valid pdf").unwrap();
    fs::write(files_dir.join("good.md"), "# Good\n\nThis is good.\n").unwrap();

    let (stdout, stderr, success) =
        run_kbchat(&config_path, &["ingest", files_dir.to_str().unwrap()]);
    assert!(success, "ingest must succeed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("2 ingested, 1 failed"), "{}", stdout);
    assert!(stdout.contains("bad.pdf"), "{}", stdout);
    assert!(stdout.contains("text extraction failed"), "{}", stdout);

    // Rejected before storage: no record for the bad file
    let (list_out, _, _) = run_kbchat(&config_path, &["docs", "list"]);
    assert!(list_out.contains("2 documents"), "{}", list_out);
}

#[test]
fn file_support_content_type_stored() {
    let (_tmp, config_path, files_dir) = setup_env(1_000_000);
    let docx = files_dir.join("handbook.docx");
    fs::write(&docx, minimal_docx("content type check")).unwrap();

    let (_, stderr, success) = run_kbchat(&config_path, &["ingest", docx.to_str().unwrap()]);
    assert!(success, "ingest failed: {}", stderr);

    let (list_out, _, _) = run_kbchat(&config_path, &["docs", "list"]);
    let id = list_out
        .lines()
        .find(|l| l.contains("content type check"))
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or_else(|| panic!("document missing from list: {}", list_out))
        .to_string();

    let (get_out, _, success) = run_kbchat(&config_path, &["docs", "get", &id]);
    assert!(success);
    assert!(
        get_out.contains(
            "content_type: application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        ),
        "{}",
        get_out
    );
}

#[test]
fn file_support_oversized_file_fails_alone() {
    let (_tmp, config_path, files_dir) = setup_env(1000);
    fs::write(files_dir.join("big.md"), "word ".repeat(400)).unwrap();
    fs::write(files_dir.join("small.md"), "# Small\n\nOk.\n").unwrap();

    let (stdout, _, success) = run_kbchat(&config_path, &["ingest", files_dir.to_str().unwrap()]);
    assert!(success, "ingest must succeed: {}", stdout);
    assert!(stdout.contains("2 ingested, 1 failed"), "{}", stdout);
    assert!(stdout.contains("file too large"), "{}", stdout);
}
