//! Pdfium-backed document provider. The `pdf` feature (on by default)
//! pulls in the pdfium-render bindings; without it this crate is empty,
//! which keeps the core testable on hosts with no pdfium library.

#[cfg(feature = "pdf")]
mod pdfium;

#[cfg(feature = "pdf")]
pub use pdfium::PdfiumProvider;
