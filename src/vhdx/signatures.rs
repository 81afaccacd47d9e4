use uuid::{uuid, Uuid};

pub const FILE_SIGN: &[u8] = b"vhdxfile";
pub const HEAD_SIGN: &[u8] = b"head";
pub const REGI_SIGN: &[u8] = b"regi";
pub const METADATA_SIGN: &[u8] = b"metadata";

pub const BAT_GUID: Uuid = uuid!("2dc27766-f623-4200-9d64-115e9bfd4a08");
pub const METADATA_REGION_GUID: Uuid = uuid!("8b7ca206-4790-4b9a-b8fe-575f050f886e");

pub const FILE_PARAMETERS_GUID: Uuid = uuid!("caa16737-fa36-4d43-b3b6-33f0aa44e76b");
pub const VIRTUAL_DISK_SIZE_GUID: Uuid = uuid!("2fa54224-cd1b-4876-b211-5dbed83bf4b8");
pub const PAGE_83_GUID: Uuid = uuid!("beca12ab-b2e6-4523-93ef-c309e000c746");
pub const LOGICAL_SECTOR_SIZE_GUID: Uuid = uuid!("8141bf1d-a96f-4709-ba47-f233a8faab5f");
pub const PHYSICAL_SECTOR_SIZE_GUID: Uuid = uuid!("cda348c7-445d-4471-9cc9-e9885251c556");
pub const PARENT_LOCATOR_GUID: Uuid = uuid!("a8d35f2d-b30b-454d-abf7-d3d83848ab0c");
pub const LOCATOR_TYPE_VHDX_GUID: Uuid = uuid!("b04aefb7-d19e-4a81-b789-25b8e9445913");

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Signature {
    Vhdxfile,
    Head,
    Regi,
    MetaData,
    Unknown,
}

pub fn sign_matches_file(bytes: &[u8]) -> Signature {
    if bytes == FILE_SIGN {
        Signature::Vhdxfile
    } else {
        Signature::Unknown
    }
}

pub fn sign_matches_head(bytes: &[u8]) -> Signature {
    if bytes == HEAD_SIGN {
        Signature::Head
    } else {
        Signature::Unknown
    }
}

pub fn sign_matches_regi(bytes: &[u8]) -> Signature {
    if bytes == REGI_SIGN {
        Signature::Regi
    } else {
        Signature::Unknown
    }
}

pub fn sign_matches_metadata(bytes: &[u8]) -> Signature {
    if bytes == METADATA_SIGN {
        Signature::MetaData
    } else {
        Signature::Unknown
    }
}
