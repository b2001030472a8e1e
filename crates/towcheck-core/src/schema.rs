/// Column names and Arrow schemas for FMCSA Company Census data.
pub mod census {
    use arrow::datatypes::{DataType, Field, Schema};

    pub const DOT_NUMBER: &str = "DOT_NUMBER";
    pub const LEGAL_NAME: &str = "LEGAL_NAME";
    pub const DBA_NAME: &str = "DBA_NAME";
    pub const COMPANY_OFFICER_1: &str = "COMPANY_OFFICER_1";
    pub const COMPANY_OFFICER_2: &str = "COMPANY_OFFICER_2";
    pub const TRUCK_UNITS: &str = "TRUCK_UNITS";
    pub const POWER_UNITS: &str = "POWER_UNITS";
    pub const TOTAL_CDL: &str = "TOTAL_CDL";
    pub const TOTAL_DRIVERS: &str = "TOTAL_DRIVERS";
    pub const PHY_STREET: &str = "PHY_STREET";
    pub const PHY_CITY: &str = "PHY_CITY";
    pub const PHY_STATE: &str = "PHY_STATE";
    pub const PHY_ZIP: &str = "PHY_ZIP";
    pub const PHY_CNTY: &str = "PHY_CNTY";
    pub const EMAIL_ADDRESS: &str = "EMAIL_ADDRESS";

    /// Census cargo column marking tow-away / drive-away operation.
    pub const CRGO_DRIVETOW: &str = "CRGO_DRIVETOW";

    /// Filtered-table column listing the matched cargo columns, `;`-joined.
    pub const CARGO_CLASSES: &str = "CARGO_CLASSES";

    // Output-only columns.
    pub const VERDICT: &str = "VERDICT";
    pub const EVIDENCE_SOURCE: &str = "EVIDENCE_SOURCE";
    pub const WEBSITE_URL: &str = "WEBSITE_URL";
    pub const VERIFIED_AT: &str = "VERIFIED_AT";

    /// Raw columns that must be present regardless of filter parameters.
    pub const REQUIRED_RAW: &[&str] = &[DOT_NUMBER, LEGAL_NAME, PHY_STATE, PHY_CITY];

    /// Raw text columns carried through when present.
    pub const OPTIONAL_TEXT: &[&str] = &[
        DBA_NAME,
        COMPANY_OFFICER_1,
        COMPANY_OFFICER_2,
        PHY_STREET,
        PHY_ZIP,
        PHY_CNTY,
        EMAIL_ADDRESS,
    ];

    /// Raw count columns carried through when present.
    pub const COUNT_COLUMNS: &[&str] = &[TRUCK_UNITS, POWER_UNITS, TOTAL_CDL, TOTAL_DRIVERS];

    /// Schema of the filtered candidate table.
    pub fn filtered_schema() -> Schema {
        Schema::new(vec![
            Field::new(DOT_NUMBER, DataType::UInt64, false),
            Field::new(LEGAL_NAME, DataType::Utf8, false),
            Field::new(DBA_NAME, DataType::Utf8, true),
            Field::new(COMPANY_OFFICER_1, DataType::Utf8, true),
            Field::new(COMPANY_OFFICER_2, DataType::Utf8, true),
            Field::new(TRUCK_UNITS, DataType::Int64, true),
            Field::new(POWER_UNITS, DataType::Int64, true),
            Field::new(TOTAL_CDL, DataType::Int64, true),
            Field::new(TOTAL_DRIVERS, DataType::Int64, true),
            Field::new(PHY_STREET, DataType::Utf8, true),
            Field::new(PHY_CITY, DataType::Utf8, true),
            Field::new(PHY_STATE, DataType::Utf8, false),
            Field::new(PHY_ZIP, DataType::Utf8, true),
            Field::new(PHY_CNTY, DataType::Utf8, true),
            Field::new(EMAIL_ADDRESS, DataType::Utf8, true),
            Field::new(CARGO_CLASSES, DataType::Utf8, false),
        ])
    }

    /// Schema of the verified output table: filtered columns plus verdict,
    /// evidence, and timestamp.
    pub fn output_schema() -> Schema {
        let mut fields: Vec<Field> = filtered_schema()
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();
        fields.push(Field::new(VERDICT, DataType::Utf8, false));
        fields.push(Field::new(EVIDENCE_SOURCE, DataType::Utf8, true));
        fields.push(Field::new(WEBSITE_URL, DataType::Utf8, true));
        fields.push(Field::new(VERIFIED_AT, DataType::Utf8, false));
        Schema::new(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::census;

    #[test]
    fn filtered_schema_has_expected_fields() {
        let schema = census::filtered_schema();
        assert_eq!(schema.fields().len(), 16);
        assert!(schema.field_with_name("DOT_NUMBER").is_ok());
        assert!(schema.field_with_name("CARGO_CLASSES").is_ok());
        assert!(!schema.field_with_name("DOT_NUMBER").unwrap().is_nullable());
    }

    #[test]
    fn output_schema_extends_filtered() {
        let filtered = census::filtered_schema();
        let output = census::output_schema();
        assert_eq!(output.fields().len(), filtered.fields().len() + 4);
        assert_eq!(output.field(0).name(), "DOT_NUMBER");
        assert!(output.field_with_name("WEBSITE_URL").is_ok());
        assert!(output.field_with_name("VERIFIED_AT").is_ok());
    }

    #[test]
    fn required_columns_are_in_filtered_schema() {
        let schema = census::filtered_schema();
        for col in census::REQUIRED_RAW
            .iter()
            .chain(census::OPTIONAL_TEXT)
            .chain(census::COUNT_COLUMNS)
        {
            assert!(schema.field_with_name(col).is_ok(), "missing {col}");
        }
    }
}
