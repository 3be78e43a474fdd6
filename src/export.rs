use std::io::{self, Write};

use crate::db::{AdRecord, KnownAdSet};

const HEADER: [&str; 7] = ["ad_id", "Title", "Url", "Description", "Location", "Date", "Price"];

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn write_row<W: Write>(w: &mut W, row: &[&str]) -> io::Result<()> {
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            w.write_all(b",")?;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            w.write_all(cell.as_bytes())?;
        }
    }
    w.write_all(b"\n")
}

fn record_row(r: &AdRecord) -> [String; 7] {
    [
        r.id.to_string(),
        r.title.clone(),
        r.url.clone(),
        r.description.clone(),
        r.location.clone(),
        r.posted.clone(),
        r.price.clone(),
    ]
}

/// Write a feed's known ads as CSV, newest first, with an `ad_id` index column.
pub fn write_csv<W: Write>(mut w: W, set: &KnownAdSet) -> io::Result<()> {
    write_row(&mut w, &HEADER)?;
    for r in set.records() {
        let row = record_row(r);
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        write_row(&mut w, &cells)?;
    }
    w.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sample_record;

    #[test]
    fn header_and_quoting() {
        let mut rec = sample_record(42, "Civic");
        rec.price = "$1,200".into();
        rec.description = "says \"mint\"\nno rust".into();
        let set = KnownAdSet::from_records(vec![rec]);

        let mut out = Vec::new();
        write_csv(&mut out, &set).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(
            text,
            "ad_id,Title,Url,Description,Location,Date,Price\n\
             42,Civic,http://www.kijiji.ca/v-cars/ottawa/42,\"says \"\"mint\"\"\nno rust\",Ottawa,2 hours ago,\"$1,200\"\n"
        );
    }

    #[test]
    fn empty_set_is_header_only() {
        let mut out = Vec::new();
        write_csv(&mut out, &KnownAdSet::default()).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
    }
}
