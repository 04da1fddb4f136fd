pub mod qr_backfill;
