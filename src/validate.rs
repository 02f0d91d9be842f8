use crate::formats::{ChapterRecord, Gap, GapReport, ValidationResult};
use crate::sanitize::{is_reserved_name, strip_and_collapse, trim_edges};
use crate::units::format_duration;

pub const GAP_TOLERANCE_MS: i64 = 1_000;
pub const SHORT_CHAPTER_MS: i64 = 30_000;
pub const LONG_CHAPTER_MS: i64 = 14_400_000;
pub const TOTAL_GAP_WARNING_MS: i64 = 10_000;
pub const MIN_COVERAGE_PERCENT: i64 = 90;
pub const MAX_TITLE_CHARS: usize = 200;

const ELLIPSIS: char = '…';

/// Stable sort on `(start, length)`; the input is left untouched.
pub fn sort_by_start_time(chapters: &[ChapterRecord]) -> Vec<ChapterRecord> {
    let mut sorted = chapters.to_vec();
    sorted.sort_by_key(|c| (c.start_offset_ms, c.length_ms));
    sorted
}

fn is_sorted(chapters: &[ChapterRecord]) -> bool {
    chapters
        .windows(2)
        .all(|w| (w[0].start_offset_ms, w[0].length_ms) <= (w[1].start_offset_ms, w[1].length_ms))
}

fn label(index: usize, chapter: &ChapterRecord) -> String {
    format!("chapter {} {:?}", index + 1, chapter.title)
}

pub fn validate_sequence(chapters: &[ChapterRecord]) -> ValidationResult {
    if chapters.is_empty() {
        return ValidationResult::from_parts(vec!["no chapters provided".to_owned()], Vec::new());
    }

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !is_sorted(chapters) {
        warnings.push("chapters were not supplied in start-time order; sorted".to_owned());
    }

    let sorted = sort_by_start_time(chapters);
    for (index, chapter) in sorted.iter().enumerate() {
        if chapter.start_offset_ms < 0 {
            errors.push(format!(
                "{} has a negative start offset ({}ms)",
                label(index, chapter),
                chapter.start_offset_ms
            ));
        }
        if chapter.length_ms <= 0 {
            errors.push(format!(
                "{} has a non-positive length ({}ms)",
                label(index, chapter),
                chapter.length_ms
            ));
        }
    }

    for (index, pair) in sorted.windows(2).enumerate() {
        let overlap = pair[0].end_ms().saturating_sub(pair[1].start_offset_ms);
        if overlap > 0 {
            errors.push(format!(
                "{} overlaps {} by {overlap}ms",
                label(index, &pair[0]),
                label(index + 1, &pair[1])
            ));
        }
    }

    ValidationResult::from_parts(errors, warnings)
}

pub fn validate_timing(
    chapters: &[ChapterRecord],
    total_duration_ms: Option<i64>,
) -> ValidationResult {
    if chapters.is_empty() {
        return ValidationResult::from_parts(vec!["no chapters provided".to_owned()], Vec::new());
    }

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let sorted = sort_by_start_time(chapters);

    for (index, chapter) in sorted.iter().enumerate() {
        if chapter.length_ms <= 0 {
            continue;
        }
        if chapter.length_ms < SHORT_CHAPTER_MS {
            warnings.push(format!(
                "{} is very short ({})",
                label(index, chapter),
                format_duration(chapter.length_ms)
            ));
        } else if chapter.length_ms > LONG_CHAPTER_MS {
            warnings.push(format!(
                "{} is very long ({})",
                label(index, chapter),
                format_duration(chapter.length_ms)
            ));
        }
    }

    let Some(total) = total_duration_ms else {
        return ValidationResult::from_parts(errors, warnings);
    };
    if total <= 0 {
        warnings.push(format!(
            "total duration {total}ms is not positive; coverage not checked"
        ));
        return ValidationResult::from_parts(errors, warnings);
    }

    for (index, chapter) in sorted.iter().enumerate() {
        let end = chapter.end_ms();
        if end > total {
            errors.push(format!(
                "{} ends at {}ms, past the audio duration of {}ms (by {}ms)",
                label(index, chapter),
                end,
                total,
                end - total
            ));
        }
    }

    let covered: i64 = sorted
        .iter()
        .map(|c| c.length_ms.max(0))
        .fold(0_i64, i64::saturating_add);
    if covered.saturating_mul(100) < total.saturating_mul(MIN_COVERAGE_PERCENT) {
        warnings.push(format!(
            "chapters cover only {}% of the audio ({} of {})",
            covered.saturating_mul(100) / total,
            format_duration(covered),
            format_duration(total)
        ));
    }

    ValidationResult::from_parts(errors, warnings)
}

pub fn detect_gaps(chapters: &[ChapterRecord]) -> GapReport {
    let sorted = sort_by_start_time(chapters);
    let mut report = GapReport::default();

    for (index, pair) in sorted.windows(2).enumerate() {
        let gap_start_ms = pair[0].end_ms();
        let gap_end_ms = pair[1].start_offset_ms;
        let duration_ms = gap_end_ms.saturating_sub(gap_start_ms);
        if duration_ms > GAP_TOLERANCE_MS {
            report.gaps.push(Gap {
                after_index: index,
                gap_start_ms,
                gap_end_ms,
                duration_ms,
            });
            report.total_gap_ms = report.total_gap_ms.saturating_add(duration_ms);
        }
    }

    report
}

fn normalize_title(title: &str, number: usize) -> String {
    let collapsed = strip_and_collapse(title);
    let mut title = trim_edges(&collapsed).to_owned();

    if title.is_empty() {
        title = format!("Chapter {number}");
    }
    if is_reserved_name(&title) {
        title.push_str(" (chapter)");
    }

    if title.chars().count() > MAX_TITLE_CHARS {
        let kept: String = title.chars().take(MAX_TITLE_CHARS - 1).collect();
        let mut truncated = trim_edges(&kept).to_owned();
        truncated.push(ELLIPSIS);
        title = truncated;
    }

    title
}

/// Makes every title usable as a file name component. Titles are numbered by their position in
/// `chapters`, so callers that care about canonical numbering sort first.
pub fn normalize_titles(chapters: &[ChapterRecord]) -> Vec<ChapterRecord> {
    chapters
        .iter()
        .enumerate()
        .map(|(index, chapter)| ChapterRecord {
            title: normalize_title(&chapter.title, index + 1),
            ..chapter.clone()
        })
        .collect()
}

pub fn validate_all(chapters: &[ChapterRecord], total_duration_ms: Option<i64>) -> ValidationResult {
    if chapters.is_empty() {
        return ValidationResult::from_parts(vec!["no chapters provided".to_owned()], Vec::new());
    }

    let sequence = validate_sequence(chapters);
    let timing = validate_timing(chapters, total_duration_ms);
    let gaps = detect_gaps(chapters);

    let mut errors = sequence.errors;
    errors.extend(timing.errors);

    let mut warnings = sequence.warnings;
    warnings.extend(timing.warnings);
    for gap in &gaps.gaps {
        warnings.push(format!(
            "gap of {} after chapter {} ({}ms to {}ms)",
            format_duration(gap.duration_ms),
            gap.after_index + 1,
            gap.gap_start_ms,
            gap.gap_end_ms
        ));
    }
    if gaps.total_gap_ms > TOTAL_GAP_WARNING_MS {
        warnings.push(format!(
            "chapters leave {} of audio uncovered across {} gaps",
            format_duration(gaps.total_gap_ms),
            gaps.gaps.len()
        ));
    }

    ValidationResult::from_parts(errors, warnings)
}
