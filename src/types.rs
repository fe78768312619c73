use serde::{Deserialize, Serialize};

/// One cell of a reconciled table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowCell {
    pub column: String,
    pub value: String,
}

/// A table row whose cells are exactly the session's target headers,
/// in the order the caller supplied them. Built only by the normalizer
/// and by the explicit edit operations below, so the invariant holds
/// for the whole lifetime of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableRow(pub Vec<RowCell>);

impl TableRow {
    /// A row with every header present and every value empty.
    pub fn blank(headers: &[String]) -> Self {
        TableRow(
            headers
                .iter()
                .map(|h| RowCell {
                    column: h.clone(),
                    value: String::new(),
                })
                .collect(),
        )
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|c| c.column == column)
            .map(|c| c.value.as_str())
    }

    /// Set a cell value. Unknown columns are ignored so the key set
    /// can never grow past the headers.
    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        if let Some(cell) = self.0.iter_mut().find(|c| c.column == column) {
            cell.value = value.into();
        }
    }

    pub fn columns(&self) -> Vec<&str> {
        self.0.iter().map(|c| c.column.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|c| c.value.trim().is_empty())
    }

    /// JSON object view of the row ({header: value, ...}).
    pub fn to_value(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for cell in &self.0 {
            map.insert(
                cell.column.clone(),
                serde_json::Value::String(cell.value.clone()),
            );
        }
        serde_json::Value::Object(map)
    }
}

/// Structured result of one extraction (single image, text paste, or a
/// folded batch). Mutated afterwards only through the edit helpers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Provider's guess of what kind of document this is.
    pub document_type: String,
    /// Narrative/header text found outside the table.
    pub narrative: String,
    pub rows: Vec<TableRow>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ScanResult {
    pub fn set_cell(&mut self, row: usize, column: &str, value: impl Into<String>) {
        if let Some(r) = self.rows.get_mut(row) {
            r.set(column, value);
        }
    }

    pub fn add_blank_row(&mut self, headers: &[String]) {
        self.rows.push(TableRow::blank(headers));
    }

    pub fn remove_row(&mut self, row: usize) {
        if row < self.rows.len() {
            self.rows.remove(row);
        }
    }
}

/// One page queued for batch extraction.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// Original filename, used in logs and warnings.
    pub name: String,
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Combined outcome of a batch run.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub result: ScanResult,
    pub pages_processed: usize,
    pub pages_failed: usize,
}

/// One stored extraction in the history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Time-based unique id (epoch milliseconds, bumped on collision).
    pub id: String,
    pub created_at: String,
    pub document_type: String,
    pub row_count: usize,
    pub result: ScanResult,
    /// Short preview for list views.
    pub preview: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn headers() -> Vec<String> {
        vec!["Name".to_string(), "Village".to_string()]
    }

    #[test]
    fn blank_row_carries_every_header() {
        let row = TableRow::blank(&headers());
        assert_eq!(row.columns(), vec!["Name", "Village"]);
        assert!(row.is_empty());
    }

    #[test]
    fn set_ignores_unknown_columns() {
        let mut row = TableRow::blank(&headers());
        row.set("Name", "Ramesh");
        row.set("Crop", "Paddy");
        assert_eq!(row.get("Name"), Some("Ramesh"));
        assert_eq!(row.columns(), vec!["Name", "Village"]);
    }

    #[test]
    fn edits_preserve_row_shape() {
        let mut result = ScanResult {
            document_type: "form".to_string(),
            narrative: String::new(),
            rows: vec![TableRow::blank(&headers())],
            warnings: vec![],
        };
        result.set_cell(0, "Village", "Pokhara");
        result.add_blank_row(&headers());
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0].get("Village"), Some("Pokhara"));
        assert_eq!(result.rows[1].columns(), vec!["Name", "Village"]);
        result.remove_row(0);
        assert_eq!(result.rows.len(), 1);
        assert!(result.rows[0].is_empty());
    }
}
