use lopdf::{Dictionary, Document, ObjectId, Stream};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::content::{ContentResolver, latin1_encode};
use crate::error::{RecolorError, Result};
use crate::recolor_params::{RecolorParams, UnresolvedPolicy};
use crate::rewrite::ColorRewriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Modified,
    Unchanged,
    /// content only partly resolved and left alone
    Skipped,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RecolorReport {
    pub pages: usize,
    pub modified: usize,
    pub unchanged: usize,
    pub skipped: usize,
    /// substitutions per rule across all pages
    pub matches: BTreeMap<&'static str, usize>,
    pub pruned: usize,
}

impl RecolorReport {
    fn record(&mut self, outcome: PageOutcome) {
        self.pages += 1;
        match outcome {
            PageOutcome::Modified => self.modified += 1,
            PageOutcome::Unchanged => self.unchanged += 1,
            PageOutcome::Skipped => self.skipped += 1,
        }
    }
}

// ========== public entry ==========
/// Load `input`, whiten its fill colors and save the result to `output`.
pub fn recolor_file(input: &Path, output: &Path, params: &RecolorParams) -> Result<RecolorReport> {
    if !input.exists() {
        return Err(RecolorError::InputNotFound(input.to_path_buf()));
    }

    info!("processing {}", input.display());
    let mut doc = Document::load(input)?;
    let report = recolor_document(&mut doc, params)?;

    doc.save(output)?;
    info!(
        "modified {} of {} pages, wrote {}",
        report.modified,
        report.pages,
        output.display()
    );
    Ok(report)
}

/// Rewrite every page in document order. Pages are never removed or
/// reordered; a changed page gets a fresh content stream of its own.
pub fn recolor_document(doc: &mut Document, params: &RecolorParams) -> Result<RecolorReport> {
    let rewriter = ColorRewriter::from_kinds(&params.rules);
    debug!("rules: {:?}, max depth {}", rewriter.rule_names(), params.max_depth);
    let mut report = RecolorReport::default();

    let pages: Vec<(u32, ObjectId)> = doc.get_pages().into_iter().collect();
    for (page_no, page_id) in pages {
        let outcome = recolor_page(doc, page_no, page_id, &rewriter, params, &mut report)?;
        debug!("page {page_no}: {outcome:?}");
        report.record(outcome);
    }

    // old content streams may now be unreachable
    if report.modified > 0 && params.prune {
        report.pruned = doc.prune_objects().len();
    }
    if params.compress {
        doc.compress();
    }
    Ok(report)
}

// ========== per page ==========
fn recolor_page(
    doc: &mut Document,
    page_no: u32,
    page_id: ObjectId,
    rewriter: &ColorRewriter,
    params: &RecolorParams,
    report: &mut RecolorReport,
) -> Result<PageOutcome> {
    let rewrite = {
        let page = doc
            .get_object(page_id)?
            .as_dict()
            .map_err(|_| RecolorError::MalformedPage { page: page_no })?;
        let Ok(contents) = page.get(b"Contents") else {
            return Ok(PageOutcome::Unchanged);
        };

        let resolution = ContentResolver::new(doc, params.max_depth).resolve(contents);
        if !resolution.is_complete() {
            for failure in &resolution.unresolved {
                warn!("page {page_no}: {failure}");
            }
            if params.unresolved == UnresolvedPolicy::Keep {
                return Ok(PageOutcome::Skipped);
            }
        }
        rewriter.rewrite(&resolution.text)
    };

    for &(rule, hits) in &rewrite.matches {
        *report.matches.entry(rule).or_default() += hits;
    }
    if !rewrite.changed {
        return Ok(PageOutcome::Unchanged);
    }

    // Shared streams stay untouched: the page gets a new object instead.
    let bytes = latin1_encode(&rewrite.text)?;
    let stream_id = doc.add_object(Stream::new(Dictionary::new(), bytes));
    doc.get_object_mut(page_id)?
        .as_dict_mut()?
        .set("Contents", stream_id);
    Ok(PageOutcome::Modified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::DEFAULT_MAX_DEPTH;
    use crate::recolor_params::RuleKind;
    use lopdf::{Object, dictionary};
    use pdf_writer::Content;

    fn gray_page() -> Vec<u8> {
        let mut content = Content::new();
        content.save_state().set_fill_gray(0.5).rect(72.0, 72.0, 200.0, 100.0).fill_nonzero().restore_state();
        content.finish()
    }

    fn blue_rgb_page() -> Vec<u8> {
        let mut content = Content::new();
        content
            .save_state()
            .set_fill_rgb(0.1, 0.2, 0.9)
            .rect(0.0, 0.0, 612.0, 792.0)
            .fill_nonzero()
            .restore_state();
        content.finish()
    }

    fn blue_cmyk_page() -> Vec<u8> {
        let mut content = Content::new();
        content
            .set_stroke_cmyk(0.9, 0.6, 0.0, 0.1)
            .move_to(0.0, 0.0)
            .line_to(612.0, 792.0)
            .stroke();
        content.finish()
    }

    /// One page per entry, each with the given object as /Contents.
    fn build_doc(doc: &mut Document, contents: Vec<Object>) {
        let pages_id = doc.new_object_id();
        let kids: Vec<Object> = contents
            .into_iter()
            .map(|c| {
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                    "Contents" => c,
                })
                .into()
            })
            .collect();
        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
    }

    fn stream_ref(doc: &mut Document, content: Vec<u8>) -> Object {
        Object::Reference(doc.add_object(Stream::new(Dictionary::new(), content)))
    }

    fn page_texts(doc: &Document) -> Vec<String> {
        let resolver = ContentResolver::new(doc, DEFAULT_MAX_DEPTH);
        doc.get_pages()
            .values()
            .map(|id| {
                let page = doc.get_object(*id).unwrap().as_dict().unwrap();
                resolver.resolve(page.get(b"Contents").unwrap()).text
            })
            .collect()
    }

    fn three_page_doc() -> Document {
        let mut doc = Document::with_version("1.5");
        let contents = vec![
            stream_ref(&mut doc, gray_page()),
            stream_ref(&mut doc, blue_rgb_page()),
            stream_ref(&mut doc, gray_page()),
        ];
        build_doc(&mut doc, contents);
        doc
    }

    #[test]
    fn only_colored_page_is_rewritten() {
        let mut doc = three_page_doc();
        let before = page_texts(&doc);

        let report = recolor_document(&mut doc, &RecolorParams::default()).unwrap();
        assert_eq!(report.pages, 3);
        assert_eq!(report.modified, 1);
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.matches.get("rgb"), Some(&1));

        let mut saved = Vec::new();
        doc.save_to(&mut saved).unwrap();
        let reloaded = Document::load_mem(&saved).unwrap();
        let after = page_texts(&reloaded);

        assert_eq!(after.len(), 3);
        assert_eq!(after[0], before[0]);
        assert_eq!(after[2], before[2]);
        assert_ne!(after[1], before[1]);
        assert!(after[1].contains("1.0 1.0 1.0 rg"));
    }

    #[test]
    fn cmyk_stroke_is_rewritten() {
        let mut doc = Document::with_version("1.5");
        let contents = vec![stream_ref(&mut doc, blue_cmyk_page())];
        build_doc(&mut doc, contents);

        let report = recolor_document(&mut doc, &RecolorParams::default()).unwrap();
        assert_eq!(report.modified, 1);
        assert!(page_texts(&doc)[0].contains("0.0 0.0 0.0 0.0 K"));
    }

    #[test]
    fn shared_stream_is_not_mutated() {
        let mut doc = Document::with_version("1.5");
        let shared = stream_ref(&mut doc, blue_rgb_page());
        let shared_id = shared.as_reference().unwrap();
        build_doc(&mut doc, vec![shared.clone(), shared]);

        let params = RecolorParams { prune: false, ..RecolorParams::default() };
        let report = recolor_document(&mut doc, &params).unwrap();
        assert_eq!(report.modified, 2);

        let original = doc.get_object(shared_id).unwrap().as_stream().unwrap();
        assert_eq!(original.content, blue_rgb_page());

        let contents: Vec<ObjectId> = doc
            .get_pages()
            .values()
            .map(|id| {
                let page = doc.get_object(*id).unwrap().as_dict().unwrap();
                page.get(b"Contents").unwrap().as_reference().unwrap()
            })
            .collect();
        assert_ne!(contents[0], shared_id);
        assert_ne!(contents[1], shared_id);
        assert_ne!(contents[0], contents[1]);
    }

    #[test]
    fn orphaned_streams_are_pruned() {
        let mut doc = three_page_doc();
        let old_id = {
            let page_id = doc.get_pages()[&2];
            let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
            page.get(b"Contents").unwrap().as_reference().unwrap()
        };

        let report = recolor_document(&mut doc, &RecolorParams::default()).unwrap();
        assert_eq!(report.pruned, 1);
        assert!(!doc.objects.contains_key(&old_id));
    }

    fn broken_array_doc() -> Document {
        let mut doc = Document::with_version("1.5");
        let blue = stream_ref(&mut doc, blue_rgb_page());
        let contents = Object::Array(vec![Object::Reference((900, 0)), blue]);
        build_doc(&mut doc, vec![contents]);
        doc
    }

    #[test]
    fn partly_unresolved_page_is_kept_by_default() {
        let mut doc = broken_array_doc();
        let report = recolor_document(&mut doc, &RecolorParams::default()).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.modified, 0);

        let page_id = doc.get_pages()[&1];
        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        assert!(page.get(b"Contents").unwrap().as_array().is_ok());
    }

    #[test]
    fn blank_policy_rewrites_what_resolved() {
        let mut doc = broken_array_doc();
        let params = RecolorParams { unresolved: UnresolvedPolicy::Blank, ..RecolorParams::default() };
        let report = recolor_document(&mut doc, &params).unwrap();
        assert_eq!(report.modified, 1);

        let text = &page_texts(&doc)[0];
        assert!(text.starts_with('\n'));
        assert!(text.contains("1.0 1.0 1.0 rg"));
    }

    #[test]
    fn page_without_contents_is_unchanged() {
        let mut doc = Document::with_version("1.5");
        build_doc(&mut doc, vec![Object::Null]);
        let report = recolor_document(&mut doc, &RecolorParams::default()).unwrap();
        assert_eq!(report.unchanged, 1);
    }

    #[test]
    fn page_missing_contents_key_is_unchanged() {
        let mut doc = Document::with_version("1.5");
        build_doc(&mut doc, vec![Object::Null]);
        let page_id = doc.get_pages()[&1];
        doc.get_object_mut(page_id).unwrap().as_dict_mut().unwrap().remove(b"Contents");

        let report = recolor_document(&mut doc, &RecolorParams::default()).unwrap();
        assert_eq!(report.unchanged, 1);
        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        assert!(page.get(b"Contents").is_err());
    }

    fn corrupt_flate_doc() -> (Document, ObjectId) {
        let mut doc = Document::with_version("1.5");
        let bad = doc.add_object(Stream::new(
            dictionary! { "Filter" => "FlateDecode" },
            b"garbage-not-zlib BT (keep me) Tj ET".to_vec(),
        ));
        let blue = stream_ref(&mut doc, blue_rgb_page());
        build_doc(&mut doc, vec![Object::Array(vec![Object::Reference(bad), blue])]);
        (doc, bad)
    }

    #[test]
    fn corrupt_stream_page_is_kept_by_default() {
        let (mut doc, bad) = corrupt_flate_doc();
        let report = recolor_document(&mut doc, &RecolorParams::default()).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.modified, 0);

        let page_id = doc.get_pages()[&1];
        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        let contents = page.get(b"Contents").unwrap().as_array().unwrap();
        assert_eq!(contents[0].as_reference().unwrap(), bad);
        assert!(doc.objects.contains_key(&bad));
    }

    #[test]
    fn disabled_rule_leaves_colors() {
        let mut doc = three_page_doc();
        let params = RecolorParams { rules: vec![RuleKind::Cmyk], ..RecolorParams::default() };
        let report = recolor_document(&mut doc, &params).unwrap();
        assert_eq!(report.modified, 0);
        assert_eq!(report.matches.get("rgb"), None);
    }

    #[test]
    fn compressed_output_still_reads_back() {
        // lopdf only keeps the flate output when it saves space
        let mut doc = Document::with_version("1.5");
        let contents = vec![
            stream_ref(&mut doc, gray_page()),
            stream_ref(&mut doc, blue_rgb_page().repeat(20)),
        ];
        build_doc(&mut doc, contents);
        let params = RecolorParams { compress: true, ..RecolorParams::default() };
        recolor_document(&mut doc, &params).unwrap();

        let page_id = doc.get_pages()[&2];
        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        let stream_id = page.get(b"Contents").unwrap().as_reference().unwrap();
        let stream = doc.get_object(stream_id).unwrap().as_stream().unwrap();
        assert!(stream.dict.get(b"Filter").is_ok());
        assert!(page_texts(&doc)[1].contains("1.0 1.0 1.0 rg"));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("manual.pdf");
        let output = dir.path().join("manual_optimized.pdf");
        three_page_doc().save(&input).unwrap();

        let report = recolor_file(&input, &output, &RecolorParams::default()).unwrap();
        assert_eq!(report.modified, 1);

        let reloaded = Document::load(&output).unwrap();
        assert_eq!(reloaded.get_pages().len(), 3);
        assert!(page_texts(&reloaded)[1].contains("1.0 1.0 1.0 rg"));
    }

    #[test]
    fn missing_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("absent.pdf");
        let err = recolor_file(&input, &dir.path().join("out.pdf"), &RecolorParams::default()).unwrap_err();
        assert!(matches!(err, RecolorError::InputNotFound(path) if path == input));
    }
}
