use scraper::Html;

use super::{extract_number, selector, ExtractError};

const SECTION: &str = "section#monthly-total";

/// Month-to-date expenditure from the cash-flow summary page.
///
/// Reads the last cell of the summary table. Unlike the account list, a
/// missing table is an error: there is no sensible zero for "we could not
/// see this month's spending".
pub fn extract_expense(markup: &str) -> Result<i64, ExtractError> {
    let document = Html::parse_document(markup);
    let section_sel = selector(SECTION)?;
    let body_sel = selector("tbody")?;
    let cell_sel = selector("td")?;

    let section = document
        .select(&section_sel)
        .next()
        .ok_or_else(|| ExtractError::SectionMissing(SECTION.to_string()))?;
    let body = section
        .select(&body_sel)
        .next()
        .ok_or(ExtractError::BodyMissing)?;
    let last = body.select(&cell_sel).last().ok_or(ExtractError::NoCells)?;

    let text: String = last.text().collect::<String>().replace('\n', "");
    Ok(extract_number(&text))
}
