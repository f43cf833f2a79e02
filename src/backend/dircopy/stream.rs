//! dircopy/stream — формат потока send/receive для DirCopyBackend (CSCOPY01).
//!
//! Формат (LE):
//!   [magic8="CSCOPY01"][name: u16 len + utf8][parent: u16 len + utf8 (пусто = полный поток)]
//!   далее записи:
//!     [tag u8=0]                                  END
//!     [tag u8=1][path]                            MKDIR
//!     [tag u8=2][path][len u64] + bytes(len)      WRITE (создать/перезаписать файл)
//!     [tag u8=3][path][target]                    SYMLINK (заменяет существующий)
//!     [tag u8=4][path]                            REMOVE (файл, ссылка или каталог целиком)
//!
//! Все строки: [len u16][utf8].

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::consts::{
    COPY_MAGIC, COPY_REC_END, COPY_REC_MKDIR, COPY_REC_REMOVE, COPY_REC_SYMLINK, COPY_REC_WRITE,
};

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Record {
    Mkdir(String),
    /// Payload длиной `len` следует сразу за заголовком; читает вызывающий.
    Write { path: String, len: u64 },
    Symlink { path: String, target: String },
    Remove(String),
    End,
}

pub(crate) struct StreamWriter<'a> {
    out: &'a mut dyn Write,
}

impl<'a> StreamWriter<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        Self { out }
    }

    pub fn header(&mut self, name: &str, parent: &str) -> io::Result<()> {
        self.out.write_all(COPY_MAGIC)?;
        write_str(self.out, name)?;
        write_str(self.out, parent)
    }

    pub fn mkdir(&mut self, path: &str) -> io::Result<()> {
        self.out.write_u8(COPY_REC_MKDIR)?;
        write_str(self.out, path)
    }

    /// Записать файл: ровно `len` байт из `data`, иначе ошибка.
    pub fn write_file(&mut self, path: &str, len: u64, data: &mut dyn Read) -> io::Result<()> {
        self.out.write_u8(COPY_REC_WRITE)?;
        write_str(self.out, path)?;
        self.out.write_u64::<LittleEndian>(len)?;
        let n = io::copy(&mut data.take(len), self.out)?;
        if n != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file '{}' shrank while sending: {} of {} bytes", path, n, len),
            ));
        }
        Ok(())
    }

    pub fn symlink(&mut self, path: &str, target: &str) -> io::Result<()> {
        self.out.write_u8(COPY_REC_SYMLINK)?;
        write_str(self.out, path)?;
        write_str(self.out, target)
    }

    pub fn remove(&mut self, path: &str) -> io::Result<()> {
        self.out.write_u8(COPY_REC_REMOVE)?;
        write_str(self.out, path)
    }

    pub fn end(&mut self) -> io::Result<()> {
        self.out.write_u8(COPY_REC_END)?;
        self.out.flush()
    }
}

pub(crate) struct StreamReader<'a> {
    input: &'a mut dyn Read,
}

impl<'a> StreamReader<'a> {
    pub fn new(input: &'a mut dyn Read) -> Self {
        Self { input }
    }

    /// (name, parent)
    pub fn header(&mut self) -> io::Result<(String, String)> {
        let mut magic = [0u8; 8];
        self.input.read_exact(&mut magic)?;
        if &magic != COPY_MAGIC {
            return Err(invalid("bad dircopy stream magic"));
        }
        let name = read_str(self.input)?;
        let parent = read_str(self.input)?;
        Ok((name, parent))
    }

    pub fn next_record(&mut self) -> io::Result<Record> {
        let tag = self.input.read_u8()?;
        match tag {
            COPY_REC_END => Ok(Record::End),
            COPY_REC_MKDIR => Ok(Record::Mkdir(read_str(self.input)?)),
            COPY_REC_WRITE => {
                let path = read_str(self.input)?;
                let len = self.input.read_u64::<LittleEndian>()?;
                Ok(Record::Write { path, len })
            }
            COPY_REC_SYMLINK => {
                let path = read_str(self.input)?;
                let target = read_str(self.input)?;
                Ok(Record::Symlink { path, target })
            }
            COPY_REC_REMOVE => Ok(Record::Remove(read_str(self.input)?)),
            other => Err(invalid(&format!("unknown dircopy record tag {}", other))),
        }
    }

    /// Скопировать payload записи WRITE в `dst`.
    pub fn copy_payload(&mut self, len: u64, dst: &mut dyn Write) -> io::Result<()> {
        let n = io::copy(&mut (&mut *self.input).take(len), dst)?;
        if n != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("truncated file payload: {} of {} bytes", n, len),
            ));
        }
        Ok(())
    }
}

fn write_str(out: &mut dyn Write, s: &str) -> io::Result<()> {
    let len = u16::try_from(s.len()).map_err(|_| invalid("string longer than 65535 bytes"))?;
    out.write_u16::<LittleEndian>(len)?;
    out.write_all(s.as_bytes())
}

fn read_str(input: &mut dyn Read) -> io::Result<String> {
    let len = input.read_u16::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| invalid("non UTF-8 string in dircopy stream"))
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}
