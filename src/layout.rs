//! On-disk layout for a book's inputs and rasterized pages.
//!
//! Each book owns a directory under the data dir: `originals/` holds the
//! input PDFs (ordered by their `-N.pdf` suffix), `pages/` holds one PNG
//! per sequential page number.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::state::SourcePdf;

pub fn book_dir(data_dir: &Path, book_id: &str) -> PathBuf {
    data_dir.join(book_id)
}

pub fn originals_dir(data_dir: &Path, book_id: &str) -> PathBuf {
    book_dir(data_dir, book_id).join("originals")
}

pub fn images_dir(data_dir: &Path, book_id: &str) -> PathBuf {
    book_dir(data_dir, book_id).join("pages")
}

/// Path of the rasterized PNG for a sequential page number.
pub fn image_path(data_dir: &Path, book_id: &str, page_num: u32) -> PathBuf {
    images_dir(data_dir, book_id).join(format!("page-{page_num:04}.png"))
}

fn pdf_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-(\d+)\.pdf$").expect("pdf suffix regex"))
}

/// List the input PDFs in a directory, ordered numerically by their
/// `-N.pdf` suffix. Files without the suffix sort after the numbered
/// ones, by name.
pub fn list_original_pdfs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut numbered: Vec<(u64, PathBuf)> = Vec::new();
    let mut unnumbered: Vec<PathBuf> = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if name.to_lowercase().ends_with(".pdf") => name.to_string(),
            _ => continue,
        };
        match pdf_suffix_re()
            .captures(&name)
            .and_then(|caps| caps[1].parse::<u64>().ok())
        {
            Some(n) => numbered.push((n, path)),
            None => unnumbered.push(path),
        }
    }

    numbered.sort_by_key(|(n, _)| *n);
    unnumbered.sort();

    let mut paths: Vec<PathBuf> = numbered.into_iter().map(|(_, p)| p).collect();
    paths.extend(unnumbered);
    Ok(paths)
}

/// Resolve a sequential page number to (pdf, zero-based page index within
/// that pdf) via cumulative page ranges. `None` when out of range.
pub fn resolve_pdf_page(pdfs: &[SourcePdf], page_num: u32) -> Option<(&SourcePdf, u32)> {
    if page_num == 0 {
        return None;
    }
    let mut offset = 0u32;
    for pdf in pdfs {
        if page_num <= offset + pdf.page_count {
            return Some((pdf, page_num - offset - 1));
        }
        offset += pdf.page_count;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf(path: &str, pages: u32) -> SourcePdf {
        SourcePdf {
            path: PathBuf::from(path),
            page_count: pages,
        }
    }

    #[test]
    fn resolves_across_cumulative_ranges() {
        let pdfs = vec![pdf("a-1.pdf", 10), pdf("a-2.pdf", 5)];
        let (hit, idx) = resolve_pdf_page(&pdfs, 1).unwrap();
        assert_eq!(hit.path, PathBuf::from("a-1.pdf"));
        assert_eq!(idx, 0);

        let (hit, idx) = resolve_pdf_page(&pdfs, 10).unwrap();
        assert_eq!(hit.path, PathBuf::from("a-1.pdf"));
        assert_eq!(idx, 9);

        let (hit, idx) = resolve_pdf_page(&pdfs, 11).unwrap();
        assert_eq!(hit.path, PathBuf::from("a-2.pdf"));
        assert_eq!(idx, 0);

        assert!(resolve_pdf_page(&pdfs, 16).is_none());
        assert!(resolve_pdf_page(&pdfs, 0).is_none());
    }

    #[test]
    fn numbered_pdfs_sort_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["book-10.pdf", "book-2.pdf", "book-1.pdf", "notes.pdf"] {
            std::fs::write(dir.path().join(name), b"%PDF").unwrap();
        }
        let paths = list_original_pdfs(dir.path()).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["book-1.pdf", "book-2.pdf", "book-10.pdf", "notes.pdf"]);
    }

    #[test]
    fn image_paths_are_zero_padded() {
        let path = image_path(Path::new("/data"), "book1", 7);
        assert!(path.ends_with("book1/pages/page-0007.png"));
    }
}
