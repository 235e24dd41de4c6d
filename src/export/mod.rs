//! File renderers used by reports and offer documents.

pub mod csv;
pub mod pdf;

pub const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";
pub const PDF_CONTENT_TYPE: &str = "application/pdf";
