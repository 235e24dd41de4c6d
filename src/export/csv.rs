/// Builds RFC 4180 CSV in memory.
#[derive(Debug, Default)]
pub struct CsvWriter {
    buf: String,
}

impl CsvWriter {
    pub fn with_header(header: &[&str]) -> Self {
        let mut writer = Self::default();
        writer.row(header.iter().copied());
        writer
    }

    pub fn row<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for (i, field) in fields.into_iter().enumerate() {
            if i > 0 {
                self.buf.push(',');
            }
            push_field(&mut self.buf, field.as_ref());
        }
        self.buf.push_str("\r\n");
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf.into_bytes()
    }
}

/// Spreadsheets evaluate cells starting with these as formulas.
const FORMULA_PREFIXES: [char; 6] = ['=', '+', '-', '@', '\t', '\r'];

fn push_field(buf: &mut String, field: &str) {
    let neutralized;
    let field = if field.starts_with(&FORMULA_PREFIXES[..]) && field.parse::<f64>().is_err() {
        neutralized = format!("'{field}");
        neutralized.as_str()
    } else {
        field
    };

    if field.contains(&[',', '"', '\r', '\n'][..]) {
        buf.push('"');
        buf.push_str(&field.replace('"', "\"\""));
        buf.push('"');
    } else {
        buf.push_str(field);
    }
}
