use std::collections::HashMap;

use lazy_static::lazy_static;

#[derive(Debug)]
pub struct CodePage {
    pub mark: u8,
    pub code_page: u16,
    pub description: &'static str,
}

lazy_static! {

    /// language driver ids, keyed by the code-page mark at header offset 29
    static ref CODEPAGEMAP: HashMap<u8, CodePage> = {
        let mut map = HashMap::new();
        map.insert(
            0x01,
            CodePage {
                mark: 0x01,
                code_page: 437,
                description: "U.S. MS-DOS",
            },
        );
        map.insert(
            0x02,
            CodePage {
                mark: 0x02,
                code_page: 850,
                description: "International MS-DOS",
            },
        );
        map.insert(
            0x03,
            CodePage {
                mark: 0x03,
                code_page: 1252,
                description: "Windows ANSI Latin I",
            },
        );
        map.insert(
            0x04,
            CodePage {
                mark: 0x04,
                code_page: 10000,
                description: "Standard Macintosh",
            },
        );
        map.insert(
            0x08,
            CodePage {
                mark: 0x08,
                code_page: 865,
                description: "Danish MS-DOS",
            },
        );
        map.insert(
            0x09,
            CodePage {
                mark: 0x09,
                code_page: 437,
                description: "Dutch MS-DOS",
            },
        );
        map.insert(
            0x0a,
            CodePage {
                mark: 0x0a,
                code_page: 850,
                description: "Dutch MS-DOS International",
            },
        );
        map.insert(
            0x0b,
            CodePage {
                mark: 0x0b,
                code_page: 437,
                description: "Finnish MS-DOS",
            },
        );
        map.insert(
            0x0d,
            CodePage {
                mark: 0x0d,
                code_page: 437,
                description: "French MS-DOS",
            },
        );
        map.insert(
            0x0e,
            CodePage {
                mark: 0x0e,
                code_page: 850,
                description: "French MS-DOS International",
            },
        );
        map.insert(
            0x0f,
            CodePage {
                mark: 0x0f,
                code_page: 437,
                description: "German MS-DOS",
            },
        );
        map.insert(
            0x10,
            CodePage {
                mark: 0x10,
                code_page: 850,
                description: "German MS-DOS International",
            },
        );
        map.insert(
            0x11,
            CodePage {
                mark: 0x11,
                code_page: 437,
                description: "Italian MS-DOS",
            },
        );
        map.insert(
            0x13,
            CodePage {
                mark: 0x13,
                code_page: 932,
                description: "Japanese Shift-JIS",
            },
        );
        map.insert(
            0x14,
            CodePage {
                mark: 0x14,
                code_page: 850,
                description: "Spanish MS-DOS International",
            },
        );
        map.insert(
            0x15,
            CodePage {
                mark: 0x15,
                code_page: 437,
                description: "Swedish MS-DOS",
            },
        );
        map.insert(
            0x18,
            CodePage {
                mark: 0x18,
                code_page: 437,
                description: "Spanish MS-DOS",
            },
        );
        map.insert(
            0x19,
            CodePage {
                mark: 0x19,
                code_page: 437,
                description: "English MS-DOS (Britain)",
            },
        );
        map.insert(
            0x1b,
            CodePage {
                mark: 0x1b,
                code_page: 437,
                description: "English MS-DOS (U.S.)",
            },
        );
        map.insert(
            0x1c,
            CodePage {
                mark: 0x1c,
                code_page: 863,
                description: "French MS-DOS (Canada)",
            },
        );
        map.insert(
            0x1f,
            CodePage {
                mark: 0x1f,
                code_page: 852,
                description: "Czech MS-DOS",
            },
        );
        map.insert(
            0x22,
            CodePage {
                mark: 0x22,
                code_page: 852,
                description: "Hungarian MS-DOS",
            },
        );
        map.insert(
            0x23,
            CodePage {
                mark: 0x23,
                code_page: 852,
                description: "Polish MS-DOS",
            },
        );
        map.insert(
            0x24,
            CodePage {
                mark: 0x24,
                code_page: 860,
                description: "Portuguese MS-DOS",
            },
        );
        map.insert(
            0x26,
            CodePage {
                mark: 0x26,
                code_page: 866,
                description: "Russian MS-DOS",
            },
        );
        map.insert(
            0x37,
            CodePage {
                mark: 0x37,
                code_page: 850,
                description: "English MS-DOS (U.S.) International",
            },
        );
        map.insert(
            0x40,
            CodePage {
                mark: 0x40,
                code_page: 852,
                description: "Romanian MS-DOS",
            },
        );
        map.insert(
            0x4d,
            CodePage {
                mark: 0x4d,
                code_page: 936,
                description: "Chinese GBK (PRC)",
            },
        );
        map.insert(
            0x4e,
            CodePage {
                mark: 0x4e,
                code_page: 949,
                description: "Korean (ANSI/OEM)",
            },
        );
        map.insert(
            0x4f,
            CodePage {
                mark: 0x4f,
                code_page: 950,
                description: "Chinese Big5 (Taiwan)",
            },
        );
        map.insert(
            0x50,
            CodePage {
                mark: 0x50,
                code_page: 874,
                description: "Thai (ANSI/OEM)",
            },
        );
        map.insert(
            0x57,
            CodePage {
                mark: 0x57,
                code_page: 1252,
                description: "ANSI",
            },
        );
        map.insert(
            0x58,
            CodePage {
                mark: 0x58,
                code_page: 1252,
                description: "Western European ANSI",
            },
        );
        map.insert(
            0x59,
            CodePage {
                mark: 0x59,
                code_page: 1252,
                description: "Spanish ANSI",
            },
        );
        map.insert(
            0x64,
            CodePage {
                mark: 0x64,
                code_page: 852,
                description: "Eastern European MS-DOS",
            },
        );
        map.insert(
            0x65,
            CodePage {
                mark: 0x65,
                code_page: 866,
                description: "Russian MS-DOS",
            },
        );
        map.insert(
            0x66,
            CodePage {
                mark: 0x66,
                code_page: 865,
                description: "Nordic MS-DOS",
            },
        );
        map.insert(
            0x67,
            CodePage {
                mark: 0x67,
                code_page: 861,
                description: "Icelandic MS-DOS",
            },
        );
        map.insert(
            0x6a,
            CodePage {
                mark: 0x6a,
                code_page: 737,
                description: "Greek MS-DOS (437G)",
            },
        );
        map.insert(
            0x6b,
            CodePage {
                mark: 0x6b,
                code_page: 857,
                description: "Turkish MS-DOS",
            },
        );
        map.insert(
            0x78,
            CodePage {
                mark: 0x78,
                code_page: 950,
                description: "Traditional Chinese Windows",
            },
        );
        map.insert(
            0x79,
            CodePage {
                mark: 0x79,
                code_page: 949,
                description: "Hangul Windows",
            },
        );
        map.insert(
            0x7a,
            CodePage {
                mark: 0x7a,
                code_page: 936,
                description: "PRC GBK Windows",
            },
        );
        map.insert(
            0x7b,
            CodePage {
                mark: 0x7b,
                code_page: 932,
                description: "Japanese Shift-JIS Windows",
            },
        );
        map.insert(
            0x7c,
            CodePage {
                mark: 0x7c,
                code_page: 874,
                description: "Thai Windows",
            },
        );
        map.insert(
            0x7d,
            CodePage {
                mark: 0x7d,
                code_page: 1255,
                description: "Hebrew Windows",
            },
        );
        map.insert(
            0x7e,
            CodePage {
                mark: 0x7e,
                code_page: 1256,
                description: "Arabic Windows",
            },
        );
        map.insert(
            0xc8,
            CodePage {
                mark: 0xc8,
                code_page: 1250,
                description: "Eastern European Windows",
            },
        );
        map.insert(
            0xc9,
            CodePage {
                mark: 0xc9,
                code_page: 1251,
                description: "Russian Windows",
            },
        );
        map.insert(
            0xca,
            CodePage {
                mark: 0xca,
                code_page: 1254,
                description: "Turkish Windows",
            },
        );
        map.insert(
            0xcb,
            CodePage {
                mark: 0xcb,
                code_page: 1253,
                description: "Greek Windows",
            },
        );
        map
    };
}

pub fn codepage_find(mark: u8) -> Option<&'static CodePage> {
    CODEPAGEMAP.get(&mark)
}

#[cfg(test)]
mod cst_tests {

    use super::*;

    #[test]
    fn find_known_marks() {
        let cp = codepage_find(0x03).unwrap();
        assert_eq!(cp.code_page, 1252);
        assert_eq!(cp.mark, 0x03);

        let cp = codepage_find(0xc9).unwrap();
        assert_eq!(cp.code_page, 1251);
    }

    #[test]
    fn unknown_mark_is_none() {
        assert!(codepage_find(0xff).is_none());
    }
}
