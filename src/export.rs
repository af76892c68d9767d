use anyhow::anyhow;
use data_model::{DatasetRecord, InventoryError};
use rust_xlsxwriter::{DocProperties, ExcelDateTime, Workbook, XlsxError};

pub const EXPORT_FILE_NAME: &str = "Municipal_Data_Inventory.xlsx";

/// Canonical export columns: file name first, then the metadata fields in
/// form order, then the blob-derived fields. Header labels match the
/// metadata entry form.
const COLUMNS: &[(&str, fn(&DatasetRecord) -> String)] = &[
    ("File Name", |r| r.file_name.clone()),
    ("Dataset Title", |r| r.dataset_title.clone()),
    ("Description", |r| r.description.clone()),
    ("Category", |r| r.category_name().to_string()),
    ("Tags / Keywords", |r| r.tags.clone()),
    ("Row Labels", |r| r.row_labels.clone()),
    ("Update Frequency", |r| r.update_frequency.clone()),
    ("Data Provided By (Agency / Department)", |r| {
        r.data_provided_by.clone()
    }),
    ("Contact Email", |r| r.contact_email.clone()),
    ("Licensing & Attribution", |r| r.licensing.clone()),
    ("Data Dictionary / Attachments", |r| r.data_dictionary.clone()),
    ("Resource Name", |r| r.resource_name.clone()),
    ("Last Updated Date", |r| r.last_updated_date.clone()),
    ("File Type", |r| r.file_type.clone()),
    ("File Size (KB)", |r| format!("{:.2}", r.file_size_kb)),
    ("Uploaded At (epoch ms)", |r| r.uploaded_at.to_string()),
];

/// Header row plus one row per record, in the order given.
pub fn inventory_rows(records: &[DatasetRecord]) -> Vec<Vec<String>> {
    let mut rows = Vec::with_capacity(records.len() + 1);
    rows.push(COLUMNS.iter().map(|(label, _)| label.to_string()).collect());
    for record in records {
        rows.push(COLUMNS.iter().map(|(_, value)| value(record)).collect());
    }
    rows
}

/// Two-column Field/Value table over the same canonical field set.
pub fn record_rows(record: &DatasetRecord) -> Vec<Vec<String>> {
    let mut rows = Vec::with_capacity(COLUMNS.len() + 1);
    rows.push(vec!["Field".to_string(), "Value".to_string()]);
    for (label, value) in COLUMNS {
        rows.push(vec![label.to_string(), value(record)]);
    }
    rows
}

pub fn inventory_workbook(records: &[DatasetRecord]) -> Result<Vec<u8>, InventoryError> {
    render(&inventory_rows(records)).map_err(|e| InventoryError::Storage(anyhow!(e)))
}

pub fn record_workbook(record: &DatasetRecord) -> Result<Vec<u8>, InventoryError> {
    render(&record_rows(record)).map_err(|e| InventoryError::Storage(anyhow!(e)))
}

/// Renders rows into a workbook. The creation datetime is pinned so the
/// same rows always produce byte-identical output.
fn render(rows: &[Vec<String>]) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let properties =
        DocProperties::new().set_creation_datetime(&ExcelDateTime::from_ymd(2000, 1, 1)?);
    workbook.set_properties(&properties);
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Inventory")?;
    for (row_num, row) in rows.iter().enumerate() {
        for (col_num, cell) in row.iter().enumerate() {
            worksheet.write_string(row_num as u32, col_num as u16, cell)?;
        }
    }
    workbook.save_to_buffer()
}

#[cfg(test)]
mod tests {
    use data_model::Category;

    use super::*;

    fn record(name: &str) -> DatasetRecord {
        let mut record = DatasetRecord::empty(name, 1700000000000);
        record.dataset_title = format!("{} title", name);
        record.category = Some(Category::Transportation);
        record.file_type = "csv".to_string();
        record.file_size_kb = 12.25;
        record
    }

    #[test]
    fn test_empty_inventory_is_header_only() {
        let rows = inventory_rows(&[]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], "File Name");
        assert_eq!(rows[0][3], "Category");
    }

    #[test]
    fn test_one_row_per_record_in_given_order() {
        let records = vec![record("z.csv"), record("a.csv")];
        let rows = inventory_rows(&records);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][0], "z.csv");
        assert_eq!(rows[2][0], "a.csv");
        assert_eq!(rows[1][3], "Transportation");
        assert_eq!(rows[1][14], "12.25");
    }

    #[test]
    fn test_record_rows_cover_all_fields() {
        let rows = record_rows(&record("a.csv"));
        assert_eq!(rows.len(), 17);
        assert_eq!(rows[0], vec!["Field", "Value"]);
        assert_eq!(rows[1], vec!["File Name", "a.csv"]);
        assert!(rows
            .iter()
            .any(|r| r[0] == "Data Provided By (Agency / Department)"));
    }

    #[test]
    fn test_export_is_byte_deterministic() {
        let records = vec![record("a.csv"), record("b.csv")];
        let first = inventory_workbook(&records).unwrap();
        let second = inventory_workbook(&records).unwrap();
        assert!(!first.is_empty());
        assert_eq!(first, second);

        let single_first = record_workbook(&records[0]).unwrap();
        let single_second = record_workbook(&records[0]).unwrap();
        assert_eq!(single_first, single_second);
    }
}
