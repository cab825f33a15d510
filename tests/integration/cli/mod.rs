mod offline;
mod roundtrip;
