//! Invoice document formatting and PDF rendering.
//!
//! An [`InvoiceDocument`] is the finalized, request-scoped invoice record:
//! every money field is pre-formatted to two decimals so the renderer only
//! places strings. [`PdfRenderer`] draws it on a single US-letter page.

use model::InvoiceRequest;
use printpdf::{
    BuiltinFont, Color, Line, Mm, PdfDocument, PdfLayerReference, Point, Rgb,
};
use thiserror::Error;

/// Rendering failures from the document collaborator.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("pdf error: {0}")]
    Pdf(String),
}

/// One formatted invoice table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLine {
    pub name: String,
    pub size: String,
    pub unit_price: String,
    pub total: String,
}

/// Finalized invoice record handed to the renderer. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceDocument {
    pub order_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub date: Option<String>,
    pub delivery_company: String,
    pub state: String,
    pub location: String,
    pub pickup_address: Option<String>,
    pub lines: Vec<DocumentLine>,
    pub subtotal: String,
    pub tax: String,
    pub total: String,
}

fn format_amount(value: f64) -> String {
    format!("NGN {value:.2}")
}

impl InvoiceDocument {
    /// Builds the formatted document from the client-supplied payload.
    pub fn from_request(req: &InvoiceRequest) -> Self {
        Self {
            order_id: req.id.clone(),
            customer_name: req.name.clone(),
            customer_email: req.email.clone(),
            customer_phone: req.number.clone(),
            date: req.date.clone(),
            delivery_company: req.delivery_company.clone(),
            state: req.state.clone(),
            location: req.location.clone(),
            pickup_address: req.pickup_address.clone(),
            lines: req
                .items
                .iter()
                .map(|item| DocumentLine {
                    name: item.name.clone(),
                    size: item.size.clone(),
                    unit_price: format_amount(item.unit_price),
                    total: format_amount(item.total),
                })
                .collect(),
            subtotal: format_amount(req.subtotal),
            tax: format_amount(req.tax),
            total: format_amount(req.total),
        }
    }
}

/// Document-rendering collaborator: consumes a finalized invoice record,
/// returns the rendered bytes.
pub trait InvoiceRenderer: Send + Sync {
    fn render(&self, invoice: &InvoiceDocument) -> Result<Vec<u8>, RenderError>;
}

/// Greedy word wrap; lines never exceed `width` chars unless a single
/// word does.
fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if current.len() + 1 + word.len() <= width {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// PDF implementation drawing the invoice on one letter-sized page.
#[derive(Debug, Default)]
pub struct PdfRenderer;

impl PdfRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl InvoiceRenderer for PdfRenderer {
    fn render(&self, invoice: &InvoiceDocument) -> Result<Vec<u8>, RenderError> {
        // US letter, in millimeters.
        let (doc, page, layer) = PdfDocument::new("Invoice", Mm(215.9), Mm(279.4), "invoice");
        let layer = doc.get_page(page).get_layer(layer);

        let margin = 18.0;
        let table_right = 197.9;
        let row_h = 7.0;

        let filled_row = |layer: &PdfLayerReference, y, color: Color| {
            layer.set_fill_color(color);
            layer.add_rect(printpdf::Rect::new(
                Mm(margin),
                Mm(y),
                Mm(table_right),
                Mm(y + row_h),
            ));
        };
        let separator = |layer: &PdfLayerReference, y| {
            layer.set_outline_color(Color::Rgb(Rgb::new(0.0, 0.0, 0.0, None)));
            layer.set_outline_thickness(0.4);
            layer.add_line(Line {
                points: vec![
                    (Point::new(Mm(margin), Mm(y)), false),
                    (Point::new(Mm(table_right), Mm(y)), false),
                ],
                is_closed: false,
            });
        };

        let font = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| RenderError::Pdf(e.to_string()))?;
        let font_bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| RenderError::Pdf(e.to_string()))?;

        let black = Color::Rgb(Rgb::new(0.0, 0.0, 0.0, None));
        let white = Color::Rgb(Rgb::new(1.0, 1.0, 1.0, None));
        let dark_blue = Color::Rgb(Rgb::new(0.0, 0.0, 0.55, None));
        let stripe_a = Color::Rgb(Rgb::new(0.96, 0.96, 0.96, None));
        let stripe_b = Color::Rgb(Rgb::new(0.83, 0.83, 0.83, None));

        // Title
        layer.set_fill_color(black.clone());
        layer.use_text("INVOICE", 20.0, Mm(88.0), Mm(260.0), &font_bold);

        // Customer and delivery column headers
        layer.use_text("Customer Details", 12.0, Mm(margin), Mm(245.0), &font_bold);
        layer.use_text("Delivery Details", 12.0, Mm(110.0), Mm(245.0), &font_bold);

        let mut y = 238.0;
        for line in [
            format!("Name: {}", invoice.customer_name),
            format!("Email: {}", invoice.customer_email),
            format!("Phone: {}", invoice.customer_phone),
            format!("Date: {}", invoice.date.as_deref().unwrap_or("-")),
        ] {
            layer.use_text(line, 10.0, Mm(margin), Mm(y), &font);
            y -= 5.5;
        }

        let mut right_y = 238.0;
        for line in [
            format!("Delivery Company: {}", invoice.delivery_company),
            format!("State: {}", invoice.state),
            format!("Location: {}", invoice.location),
        ] {
            layer.use_text(line, 10.0, Mm(110.0), Mm(right_y), &font);
            right_y -= 5.5;
        }
        if let Some(address) = &invoice.pickup_address {
            layer.use_text("Pickup Address:", 10.0, Mm(110.0), Mm(right_y), &font);
            right_y -= 5.5;
            for line in wrap_text(address, 50) {
                layer.use_text(line, 10.0, Mm(110.0), Mm(right_y), &font);
                right_y -= 5.5;
            }
        }

        let mut y = right_y.min(y) - 8.0;
        layer.use_text(
            format!("Order ID: {}", invoice.order_id),
            12.0,
            Mm(margin),
            Mm(y),
            &font_bold,
        );
        separator(&layer, y - 3.0);

        // Table header
        y -= 16.0;
        filled_row(&layer, y, dark_blue);
        layer.set_fill_color(white);
        layer.use_text("NO.", 10.0, Mm(20.0), Mm(y + 2.0), &font_bold);
        layer.use_text("ITEM", 10.0, Mm(35.0), Mm(y + 2.0), &font_bold);
        layer.use_text("SIZE", 10.0, Mm(95.0), Mm(y + 2.0), &font_bold);
        layer.use_text("UNIT PRICE", 10.0, Mm(120.0), Mm(y + 2.0), &font_bold);
        layer.use_text("TOTAL", 10.0, Mm(165.0), Mm(y + 2.0), &font_bold);

        // Table rows, striped
        y -= row_h;
        for (i, line) in invoice.lines.iter().enumerate() {
            let stripe = if i % 2 == 0 { stripe_a.clone() } else { stripe_b.clone() };
            filled_row(&layer, y, stripe);
            layer.set_fill_color(black.clone());
            layer.use_text((i + 1).to_string(), 10.0, Mm(20.0), Mm(y + 2.0), &font);
            layer.use_text(&line.name, 10.0, Mm(35.0), Mm(y + 2.0), &font);
            layer.use_text(&line.size, 10.0, Mm(95.0), Mm(y + 2.0), &font);
            layer.use_text(&line.unit_price, 10.0, Mm(120.0), Mm(y + 2.0), &font);
            layer.use_text(&line.total, 10.0, Mm(165.0), Mm(y + 2.0), &font);
            y -= row_h;
        }
        separator(&layer, y + row_h - 2.0);

        // Totals block
        y -= 8.0;
        layer.set_fill_color(black.clone());
        layer.use_text("Subtotal:", 10.0, Mm(120.0), Mm(y), &font_bold);
        layer.use_text(&invoice.subtotal, 10.0, Mm(165.0), Mm(y), &font);
        y -= 5.5;
        layer.use_text("Tax (10%):", 10.0, Mm(120.0), Mm(y), &font_bold);
        layer.use_text(&invoice.tax, 10.0, Mm(165.0), Mm(y), &font);
        y -= 6.5;
        layer.use_text("Total:", 12.0, Mm(120.0), Mm(y), &font_bold);
        layer.use_text(&invoice.total, 12.0, Mm(165.0), Mm(y), &font_bold);

        // Footer
        y -= 14.0;
        layer.use_text(
            "Thank you for your order!",
            8.0,
            Mm(margin),
            Mm(y),
            &font,
        );
        layer.use_text(
            "We appreciate your support and look forward to serving you again.",
            8.0,
            Mm(margin),
            Mm(y - 4.0),
            &font,
        );

        doc.save_to_bytes().map_err(|e| RenderError::Pdf(e.to_string()))
    }
}
